//! Understudy Core - request/response model and the pieces every mode shares.
//!
//! This crate holds everything the proxy engine needs that is independent of
//! networking and storage:
//!
//! - [`models`]: the request/response pair and its JSON views
//! - [`fingerprint`]: stable lookup keys plus encode/decode of stored pairs
//! - [`mode`]: the five operating modes and the shared mode cell
//! - [`metrics`]: per-mode request counters
//! - [`middleware`]: the out-of-process transform bridge
//!
//! ## Usage
//!
//! ```
//! use understudy_core::fingerprint;
//! use understudy_core::models::{RequestDetails, RequestResponsePair, ResponseDetails};
//!
//! let request = RequestDetails::new("GET", "http", "api.example.com", "/users");
//! let pair = RequestResponsePair::new(request, ResponseDetails::new(200, "[]"));
//!
//! let key = fingerprint::key(&pair.request);
//! let stored = fingerprint::encode(&pair).unwrap();
//! assert_eq!(fingerprint::decode(&stored).unwrap(), pair);
//! assert_eq!(key.as_str().len(), 64);
//! ```

pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod middleware;
pub mod mode;
pub mod models;

pub use error::{CoreError, Result, TransformError};
pub use fingerprint::FingerprintKey;
pub use metrics::MetricsCounter;
pub use middleware::{MiddlewareBridge, Transform};
pub use mode::{Mode, ModeError, ModeState};
pub use models::{
    Headers, MiddlewarePayload, RecordsView, RequestDetails, RequestDetailsView,
    RequestResponsePair, RequestResponsePairView, ResponseDetails, ResponseDetailsView,
};
