pub mod cache;
pub mod client;
pub mod rejection;
pub mod types;

pub use cache::{CacheLookup, QueryCache};
pub use client::{BackendApi, HttpBackend};
pub use rejection::{classify_failure, Rejection, RemoteError, Severity, SuggestedAction};
pub use types::{
    CacheTag, MutationRequest, MutationResponse, MutationTicket, QueryKey, QueryRequest,
    QueryResponse, QueryTicket, SubmissionReceipt,
};
