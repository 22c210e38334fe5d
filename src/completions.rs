use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap_complete::{generate, Shell};

use crate::engine::EngineError;

const BIN_NAME: &str = "fedicache";

pub fn generate_completions(shell: Shell, buf: &mut dyn Write) {
    let mut cmd = crate::cli::styled_command();
    generate(shell, &mut cmd, BIN_NAME, buf);
}

pub fn detect_current_shell() -> Option<Shell> {
    let shell_var = std::env::var("SHELL").ok()?;
    parse_shell(shell_var.rsplit('/').next()?)
}

fn completions_install_path_for_home(shell: Shell, home: &Path) -> Option<PathBuf> {
    match shell {
        Shell::Bash => Some(home.join(".local/share/bash-completion/completions").join(BIN_NAME)),
        Shell::Zsh => Some(home.join(".config/fedicache/completions/fedicache.zsh")),
        Shell::Fish => Some(home.join(".config/fish/completions/fedicache.fish")),
        _ => None,
    }
}

pub fn install_completions_in(shell: Shell, home: &Path) -> io::Result<PathBuf> {
    let path = completions_install_path_for_home(shell, home).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no install path for {shell:?}"),
        )
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    generate_completions(shell, &mut buf);
    std::fs::write(&path, buf)?;

    if shell == Shell::Zsh {
        patch_zshrc(home, &path)?;
    }
    Ok(path)
}

fn patch_zshrc(home: &Path, completions_path: &Path) -> io::Result<()> {
    let zshrc = home.join(".zshrc");
    let source_line = format!("source \"{}\"", completions_path.display());

    if zshrc.exists() && std::fs::read_to_string(&zshrc)?.contains(&source_line) {
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)?;
    writeln!(file)?;
    writeln!(file, "# fedicache shell completions")?;
    writeln!(file, "{source_line}")?;
    Ok(())
}

fn parse_shell(raw: &str) -> Option<Shell> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "powershell" | "pwsh" => Some(Shell::PowerShell),
        _ => None,
    }
}

pub fn run_completions_command(shell_arg: Option<&str>, install: bool) -> Result<(), EngineError> {
    let shell = match shell_arg {
        Some(name) => parse_shell(name)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown shell '{name}'")))?,
        None => detect_current_shell().ok_or_else(|| {
            EngineError::InvalidArgument(
                "unable to detect shell from $SHELL; pass a shell name".to_string(),
            )
        })?,
    };

    if install {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::InvalidArgument("HOME is not set".to_string()))?;
        let path = install_completions_in(shell, &home)?;
        println!("completions installed to {}", path.display());
    } else {
        let mut stdout = io::stdout().lock();
        generate_completions(shell, &mut stdout);
    }
    Ok(())
}
