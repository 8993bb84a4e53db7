//! Hosted backend: a real browser tab plus the host's HTTP API.
//!
//! `banter-engine` only knows the capability traits in its `page`,
//! `completion` and `retrieval` modules. This crate supplies the live
//! implementations: [`BrowserSession`] owns a Chromium instance via
//! CDP, [`HostedPage`] drives the chat tab through injected
//! JavaScript, and [`ApiClient`] talks to the same-origin HTTP API
//! with the session cookies lifted from the browser.

pub mod api;
pub mod page;
pub mod session;

pub use api::ApiClient;
pub use page::HostedPage;
pub use session::BrowserSession;
