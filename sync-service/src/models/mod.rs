pub mod row;
pub mod submission;

pub use row::{TableCursor, TableRegistration, TableRow};
pub use submission::{AttachmentEntry, Submission, SubmissionRoute, SubmissionStatus};
