pub mod metrics;
pub mod polling;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod routes;
pub mod store;
pub mod submission;
pub mod token;

pub use metrics::{get_metrics, init_metrics};
pub use polling::{PollReport, PollingEngine, TableOutcome};
pub use registry::TableRegistry;
pub use remote::{DataverseSource, MockTableSource, TableSource};
pub use retry::RetryPolicy;
pub use routes::{DeliveryRoute, EmailRoute, LocalRoute, MockRoute, SftpRoute};
pub use store::{ConnectorStore, MemoryStore, MongoStore};
pub use submission::SubmissionService;
pub use token::{MockTokenExchanger, OAuthTokenExchanger, TokenExchanger, TokenManager};
