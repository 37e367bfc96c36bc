#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Declarative HTTP API invocation
//!
//! An operation of a remote HTTP API is described once by an
//! [`ActionDescriptor`]: its parameters, its return handling and the ordered
//! behaviors that turn runtime arguments into a request. The
//! [`ActionInvoker`] then runs each call through a fixed pipeline:
//!
//! 1. action and parameter behaviors build the request (ascending priority)
//! 2. filter behaviors run their request hook
//! 3. the request is handed to the injected [`Transport`]
//! 4. filter behaviors run their response hook (reverse order, always)
//! 5. the first return behavior whose media type matches the response
//!    produces the result
//!
//! # Example
//!
//! ```ignore
//! use apikit::behavior::{HttpMethod, PathParam};
//! use apikit::{ActionDescriptor, ApiClient, Argument, HttpApiOptions, Model};
//!
//! let get_user = ActionDescriptor::builder("get_user")
//!     .behavior(HttpMethod::get("/users/{id}"))
//!     .parameter::<u64>("id", PathParam::new())
//!     .returns::<Model<User>>()
//!     .build()?;
//!
//! let client = ApiClient::builder(HttpApiOptions::with_host(host))
//!     .action(get_user)
//!     .build()?;
//!
//! let Model(user) = client.invoke::<Model<User>>("get_user", vec![Argument::from(42)]).await?;
//! ```

pub mod behavior;
mod client;
mod config;
mod context;
mod descriptor;
mod error;
mod invoker;
pub mod key_value;
pub mod media_type;
mod properties;
mod request;
mod response;
mod returns;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::HttpApiOptions;
pub use context::{RequestContext, ResponseContext};
pub use descriptor::{
    ActionBinding, ActionDescriptor, ActionDescriptorBuilder, Argument, ParameterDescriptor,
    ReturnDescriptor, ReturnKind,
};
pub use error::{ApiError, BoxError, ErrorKind};
pub use invoker::ActionInvoker;
pub use key_value::{KeyValue, KeyValueSerializer, KeyValueSerializerOptions};
pub use properties::{Properties, PropertyKey};
pub use request::{ApiRequest, FormDataContent, FormDataPart, RequestBody};
pub use response::{ApiResponse, ResponseBody, StreamingBody};
pub use returns::{ApiReturn, ApiValue, ByteStream, Model};
pub use transport::{CompletionMode, HyperTransport, Transport, TransportConfig, TransportSecurity};
