use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerFamily {
    Mastodon,
    Glitch,
    Hometown,
    Fedibird,
    Pleroma,
    Akkoma,
    Gotosocial,
    Calckey,
    Firefish,
    Iceshrimp,
    Sharkey,
    Unknown(String),
}

impl ServerFamily {
    pub fn as_str(&self) -> &str {
        match self {
            ServerFamily::Mastodon => "mastodon",
            ServerFamily::Glitch => "glitch",
            ServerFamily::Hometown => "hometown",
            ServerFamily::Fedibird => "fedibird",
            ServerFamily::Pleroma => "pleroma",
            ServerFamily::Akkoma => "akkoma",
            ServerFamily::Gotosocial => "gotosocial",
            ServerFamily::Calckey => "calckey",
            ServerFamily::Firefish => "firefish",
            ServerFamily::Iceshrimp => "iceshrimp",
            ServerFamily::Sharkey => "sharkey",
            ServerFamily::Unknown(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mastodon" => ServerFamily::Mastodon,
            "glitch" | "glitch-soc" | "glitchsoc" => ServerFamily::Glitch,
            "hometown" => ServerFamily::Hometown,
            "fedibird" => ServerFamily::Fedibird,
            "pleroma" => ServerFamily::Pleroma,
            "akkoma" => ServerFamily::Akkoma,
            "gotosocial" => ServerFamily::Gotosocial,
            "calckey" => ServerFamily::Calckey,
            "firefish" => ServerFamily::Firefish,
            "iceshrimp" => ServerFamily::Iceshrimp,
            "sharkey" => ServerFamily::Sharkey,
            other => ServerFamily::Unknown(other.to_string()),
        }
    }
}

impl From<String> for ServerFamily {
    fn from(value: String) -> Self {
        ServerFamily::parse(&value)
    }
}

impl From<ServerFamily> for String {
    fn from(value: ServerFamily) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ServerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PreRelease {
    Numeric(u64),
    Alpha(String),
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreRelease::Numeric(a), PreRelease::Numeric(b)) => a.cmp(b),
            (PreRelease::Numeric(_), PreRelease::Alpha(_)) => Ordering::Less,
            (PreRelease::Alpha(_), PreRelease::Numeric(_)) => Ordering::Greater,
            (PreRelease::Alpha(a), PreRelease::Alpha(b)) => a.cmp(b),
        }
    }
}

/// Semantic version with semver precedence: a pre-release sorts before its release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Vec<PreRelease>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    pub fn with_numeric_pre(mut self, pre: u64) -> Self {
        self.pre.push(PreRelease::Numeric(pre));
        self
    }

    /// Lenient parse: accepts a leading `v`, missing minor/patch, and trailing
    /// build metadata or parenthesised text.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let raw = raw.split_whitespace().next()?;
        let raw = raw.split('+').next()?;
        let (core, pre) = match raw.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (raw, None),
        };

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };

        let pre = pre
            .map(|pre| {
                pre.split('.')
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| match segment.parse::<u64>() {
                        Ok(number) => PreRelease::Numeric(number),
                        Err(_) => PreRelease::Alpha(segment.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (index, segment) in self.pre.iter().enumerate() {
            f.write_str(if index == 0 { "-" } else { "." })?;
            match segment {
                PreRelease::Numeric(number) => write!(f, "{number}")?,
                PreRelease::Alpha(text) => f.write_str(text)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Version::parse(value).ok_or_else(|| format!("invalid version '{}'", value))
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid version '{raw}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeatureFlag {
    EmojiReactions,
    Translation,
    Other(String),
}

impl FeatureFlag {
    pub fn as_str(&self) -> &str {
        match self {
            FeatureFlag::EmojiReactions => "emoji_reactions",
            FeatureFlag::Translation => "translation",
            FeatureFlag::Other(raw) => raw,
        }
    }
}

impl From<String> for FeatureFlag {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "emoji_reactions" => FeatureFlag::EmojiReactions,
            "translation" => FeatureFlag::Translation,
            other => FeatureFlag::Other(other.to_string()),
        }
    }
}

impl From<FeatureFlag> for String {
    fn from(value: FeatureFlag) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub family: ServerFamily,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub features: BTreeSet<FeatureFlag>,
}

impl ServerDescriptor {
    pub fn new(family: ServerFamily, version: Option<Version>) -> Self {
        Self {
            family,
            version,
            features: BTreeSet::new(),
        }
    }

    pub fn with_feature(mut self, feature: FeatureFlag) -> Self {
        self.features.insert(feature);
        self
    }

    /// Builds a descriptor from NodeInfo-style software data. Servers that
    /// report a Mastodon-compatible version embed their real software, e.g.
    /// `2.7.2 (compatible; Pleroma 2.5.0)`.
    pub fn detect(software_name: &str, version: &str) -> Self {
        if let Some((family, embedded)) = compatible_software(version) {
            return Self::new(family, Version::parse(&embedded));
        }

        let mut family = ServerFamily::parse(software_name);
        if family == ServerFamily::Mastodon {
            let lowered = version.to_ascii_lowercase();
            if lowered.contains("glitch") {
                family = ServerFamily::Glitch;
            } else if lowered.contains("hometown") {
                family = ServerFamily::Hometown;
            }
        }
        Self::new(family, Version::parse(version))
    }
}

fn compatible_software(version: &str) -> Option<(ServerFamily, String)> {
    let start = version.find("(compatible;")?;
    let inner = version[start + "(compatible;".len()..]
        .trim()
        .trim_end_matches(')');
    let mut words = inner.split_whitespace();
    let name = words.next()?;
    let embedded = words.next()?.trim_end_matches(')');
    Some((ServerFamily::parse(name), embedded.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionFloor {
    AssumeAvailable,
    AtLeast(Version),
}

/// Boolean expression over family/version leaves and detected features.
/// `Any(vec![])` is the legal "no known server supports this" value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Family {
        family: ServerFamily,
        floor: VersionFloor,
    },
    Feature(FeatureFlag),
    All(Vec<Requirement>),
    Any(Vec<Requirement>),
}

impl Requirement {
    pub fn unsupported() -> Self {
        Requirement::Any(Vec::new())
    }

    pub fn family(family: ServerFamily, floor: Version) -> Self {
        Requirement::Family {
            family,
            floor: VersionFloor::AtLeast(floor),
        }
    }

    pub fn assume(family: ServerFamily) -> Self {
        Requirement::Family {
            family,
            floor: VersionFloor::AssumeAvailable,
        }
    }

    pub fn feature(feature: FeatureFlag) -> Self {
        Requirement::Feature(feature)
    }

    pub fn mastodon_forks(floor: VersionFloor) -> Self {
        Requirement::Any(
            [
                ServerFamily::Mastodon,
                ServerFamily::Glitch,
                ServerFamily::Hometown,
            ]
            .into_iter()
            .map(|family| Requirement::Family {
                family,
                floor: floor.clone(),
            })
            .collect(),
        )
    }

    pub fn is_satisfied_by(&self, server: &ServerDescriptor) -> bool {
        match self {
            Requirement::Family { family, floor } => {
                if *family != server.family {
                    return false;
                }
                match floor {
                    VersionFloor::AssumeAvailable => true,
                    VersionFloor::AtLeast(min) => server
                        .version
                        .as_ref()
                        .is_some_and(|version| version >= min),
                }
            }
            Requirement::Feature(feature) => server.features.contains(feature),
            Requirement::All(branches) => branches.iter().all(|branch| branch.is_satisfied_by(server)),
            Requirement::Any(branches) => branches.iter().any(|branch| branch.is_satisfied_by(server)),
        }
    }
}

impl BitOr for Requirement {
    type Output = Requirement;

    fn bitor(self, rhs: Requirement) -> Requirement {
        let mut branches = Vec::new();
        for side in [self, rhs] {
            match side {
                Requirement::Any(inner) => branches.extend(inner),
                other => branches.push(other),
            }
        }
        Requirement::Any(branches)
    }
}

impl BitAnd for Requirement {
    type Output = Requirement;

    fn bitand(self, rhs: Requirement) -> Requirement {
        let mut branches = Vec::new();
        for side in [self, rhs] {
            match side {
                Requirement::All(inner) => branches.extend(inner),
                other => branches.push(other),
            }
        }
        Requirement::All(branches)
    }
}

/// `None` means the operation has no requirement and is always attempted.
pub fn allowed(requirement: Option<&Requirement>, server: &ServerDescriptor) -> bool {
    requirement.map_or(true, |requirement| requirement.is_satisfied_by(server))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Trends,
    TagTimeline,
    ListTimeline,
    Rules,
    MuteStatus,
    EmojiReact,
    PleromaReact,
    AdvancedPostOptions,
    PublicTimeline,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Trends,
        Operation::TagTimeline,
        Operation::ListTimeline,
        Operation::Rules,
        Operation::MuteStatus,
        Operation::EmojiReact,
        Operation::PleromaReact,
        Operation::AdvancedPostOptions,
        Operation::PublicTimeline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Trends => "trends",
            Operation::TagTimeline => "tag_timeline",
            Operation::ListTimeline => "list_timeline",
            Operation::Rules => "rules",
            Operation::MuteStatus => "mute_status",
            Operation::EmojiReact => "emoji_react",
            Operation::PleromaReact => "pleroma_react",
            Operation::AdvancedPostOptions => "advanced_post_options",
            Operation::PublicTimeline => "public_timeline",
        }
    }

    pub fn requirement(self) -> Option<Requirement> {
        use ServerFamily::*;
        let assume_pleromas = || Requirement::assume(Pleroma) | Requirement::assume(Akkoma);
        let misskeys = |calckey: Version| {
            Requirement::family(Calckey, calckey)
                | Requirement::family(Firefish, Version::new(1, 0, 0))
                | Requirement::family(Iceshrimp, Version::new(1, 0, 0))
        };

        match self {
            Operation::Trends => Some(
                Requirement::mastodon_forks(VersionFloor::AtLeast(Version::new(3, 5, 0)))
                    | misskeys(Version::new(14, 0, 0).with_numeric_pre(0)),
            ),
            Operation::TagTimeline => Some(
                Requirement::mastodon_forks(VersionFloor::AssumeAvailable)
                    | assume_pleromas()
                    | Requirement::family(Gotosocial, Version::new(0, 11, 0).with_numeric_pre(0))
                    | misskeys(Version::new(14, 0, 0).with_numeric_pre(0)),
            ),
            Operation::ListTimeline => Some(
                Requirement::mastodon_forks(VersionFloor::AssumeAvailable)
                    | assume_pleromas()
                    | Requirement::family(Gotosocial, Version::new(0, 10, 0).with_numeric_pre(0))
                    | misskeys(Version::new(14, 0, 0).with_numeric_pre(0)),
            ),
            Operation::Rules => Some(
                Requirement::mastodon_forks(VersionFloor::AtLeast(Version::new(3, 4, 0)))
                    | Requirement::family(Fedibird, Version::new(0, 1, 0))
                    | Requirement::family(Gotosocial, Version::new(0, 12, 0)),
            ),
            Operation::MuteStatus => Some(
                Requirement::mastodon_forks(VersionFloor::AssumeAvailable)
                    | assume_pleromas()
                    | Requirement::assume(Gotosocial),
            ),
            Operation::EmojiReact => Some(
                Requirement::feature(FeatureFlag::EmojiReactions)
                    | Requirement::family(Firefish, Version::new(1, 0, 4).with_numeric_pre(0))
                    | Requirement::family(Iceshrimp, Version::new(1, 0, 2)),
            ),
            Operation::PleromaReact => Some(assume_pleromas()),
            Operation::AdvancedPostOptions => Some(Requirement::unsupported()),
            Operation::PublicTimeline => None,
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Operation::ALL
            .into_iter()
            .find(|operation| operation.as_str() == normalized)
            .ok_or_else(|| format!("unknown operation '{}'", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityMode {
    #[default]
    Strict,
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    Unsupported {
        operation: String,
        family: ServerFamily,
    },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::Unsupported { operation, family } => write!(
                f,
                "operation '{}' is not supported by the connected {} server",
                operation, family
            ),
        }
    }
}

impl Error for CapabilityError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityGate {
    mode: CapabilityMode,
}

impl CapabilityGate {
    pub fn new(mode: CapabilityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CapabilityMode {
        self.mode
    }

    /// `Ok(true)`: attempt the call. `Ok(false)`: lenient mode absorbed an
    /// unsupported call, skip it. `Err`: strict mode rejected it.
    pub fn check(
        &self,
        operation: Operation,
        server: &ServerDescriptor,
    ) -> Result<bool, CapabilityError> {
        if allowed(operation.requirement().as_ref(), server) {
            return Ok(true);
        }
        match self.mode {
            CapabilityMode::Strict => Err(CapabilityError::Unsupported {
                operation: operation.as_str().to_string(),
                family: server.family.clone(),
            }),
            CapabilityMode::Lenient => {
                tracing::debug!(
                    operation = operation.as_str(),
                    family = %server.family,
                    "skipping operation unsupported by server"
                );
                Ok(false)
            }
        }
    }
}
