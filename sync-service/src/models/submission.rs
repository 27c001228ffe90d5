use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionRoute {
    Local,
    Email,
    Sftp,
}

impl std::fmt::Display for SubmissionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionRoute::Local => write!(f, "local"),
            SubmissionRoute::Email => write!(f, "email"),
            SubmissionRoute::Sftp => write!(f, "sftp"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Built,
    Delivered,
    Failed,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "pending"),
            SubmissionStatus::Built => write!(f, "built"),
            SubmissionStatus::Delivered => write!(f, "delivered"),
            SubmissionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Name and size of one attachment that went into the package. The bytes
/// themselves live only in the built archive, never in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentEntry {
    pub name: String,
    pub byte_size: u64,
}

/// One submission package and its delivery state machine:
/// Pending -> Built -> Delivered, or -> Failed once the retry budget is
/// spent. The route is fixed at creation; Delivered is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub submission_id: String,
    pub tenant_id: String,
    pub route: SubmissionRoute,
    pub status: SubmissionStatus,
    pub answers: serde_json::Value,
    pub attachments: Vec<AttachmentEntry>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub delivered_utc: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub failed_utc: Option<DateTime<Utc>>,
}

// Helper module for optional DateTime<Utc> as BSON DateTime
mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => {
                let bson_dt = bson::DateTime::from_chrono(*dt);
                bson_dt.serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}

impl Submission {
    pub fn new(
        submission_id: String,
        tenant_id: String,
        route: SubmissionRoute,
        answers: serde_json::Value,
        attachments: Vec<AttachmentEntry>,
    ) -> Self {
        Self {
            id: None,
            submission_id,
            tenant_id,
            route,
            status: SubmissionStatus::Pending,
            answers,
            attachments,
            attempts: 0,
            last_error: None,
            location: None,
            created_utc: Utc::now(),
            delivered_utc: None,
            failed_utc: None,
        }
    }

    pub fn mark_built(&mut self) {
        self.status = SubmissionStatus::Built;
    }

    pub fn mark_delivered(&mut self, location: String) {
        self.status = SubmissionStatus::Delivered;
        self.location = Some(location);
        self.delivered_utc = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = SubmissionStatus::Failed;
        self.failed_utc = Some(Utc::now());
        self.last_error = Some(error);
    }

    /// Re-enter the state machine from Failed for another bounded round
    /// of attempts.
    pub fn mark_retrying(&mut self) {
        self.status = SubmissionStatus::Pending;
        self.failed_utc = None;
    }

    pub fn is_terminal_success(&self) -> bool {
        self.status == SubmissionStatus::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_clears_error_and_stamps_time() {
        let mut s = Submission::new(
            "m1".into(),
            "t1".into(),
            SubmissionRoute::Local,
            serde_json::json!({"event_id": "e1"}),
            vec![],
        );
        s.mark_failed("io".into());
        s.mark_retrying();
        assert_eq!(s.status, SubmissionStatus::Pending);
        assert!(s.failed_utc.is_none());

        s.mark_delivered("local:/tmp/x.zip".into());
        assert!(s.is_terminal_success());
        assert!(s.last_error.is_none());
        assert!(s.delivered_utc.is_some());
    }
}
