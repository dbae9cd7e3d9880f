mod callback_url;
mod challenge;
mod hub_mode;
mod topic_url;
mod url_policy;
mod verify_token;

pub use callback_url::CallbackUrl;
pub use challenge::Challenge;
pub use hub_mode::HubMode;
pub use hub_mode::VerifyMode;
pub use topic_url::TopicUrl;
pub use url_policy::normalize_iri;
pub use verify_token::VerifyToken;
