mod account;
mod decode;
mod filter;
mod notification;
mod status;

pub use account::{Account, AccountField, Emoji};
pub use decode::{normalize_datetime, null_default, parse_datetime};
pub use filter::{FilterAction, FilterContext, FilterKeyword, FilterPayload, FilterRule};
pub use notification::{Announcement, Conversation, Notification, NotificationType};
pub use status::{
    Attachment, AttachmentType, Card, Context, Mention, Poll, PollOption, Reaction, ServerFilterRef,
    ServerFilterResult, Status, Tag, Visibility,
};
