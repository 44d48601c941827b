//! GPS Data Gateway
//!
//! Single-endpoint HTTP gateway that serves per-vehicle GPS data documents
//! stored in S3. A lookup names a user, a vehicle and a calendar date; the
//! gateway turns that into an object key, downloads the object and returns
//! its bytes as `application/json`.
//!
//! ## Request flow
//!
//! ```text
//! GET /get-data?user_id=&vehicle_id=&year=&month=&day=
//!        │
//!        ▼
//! ┌──────────────┐  400 Missing query parameters
//! │ Validate     │──────────────────────────────▶
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐  400 Invalid month format
//! │ Key Builder  │──────────────────────────────▶
//! └──────────────┘  400 Invalid query parameters ('/' in an identifier)
//!        │ {prefix}/{dataset}/{env}/{user}/{vehicle}/{year}/{Month}/{day}/{file}
//!        ▼
//! ┌──────────────┐  500 Failed to retrieve object
//! │ Object       │──────────────────────────────▶
//! │ Fetcher      │
//! └──────────────┘
//!        │ memory or temp file
//!        ▼
//! ┌──────────────┐  500 Failed to read downloaded file
//! │ Serve        │──────────────────────────────▶
//! └──────────────┘
//!        │
//!        ▼
//!   200 application/json
//! ```

pub mod api;
pub mod config;
pub mod key_builder;
pub mod object_fetcher;

pub use api::{create_router, start_api_server, ApiError, AppState};
pub use config::{BufferMode, Config, KeyConfig};
pub use key_builder::{build_key, month_name, InvalidMonth, KeyError, LookupRequest};
pub use object_fetcher::{FetchError, ObjectFetcher, ObjectStore, Payload, S3ObjectStore};
