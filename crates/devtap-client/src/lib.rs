//! Chrome DevTools Protocol client core.
//!
//! Talks to a browser's debugging endpoint over one WebSocket per target:
//!
//! - Concurrent calls matched to their responses by id (`Runtime.evaluate`,
//!   `DOM.describeNode`, ...)
//! - One-shot waits for the next occurrence of an event, and persistent
//!   listeners that see every event
//! - Release of page-side objects through object groups and handles, sent
//!   from a background queue so `Drop` never blocks
//! - Reference-counted `{Domain}.enable` / `{Domain}.disable`
//! - Target discovery over `http://{host}:{port}/json/list`
//!
//! # Architecture
//!
//! - **`transport`**: whole-message send/receive over WebSocket, with an
//!   in-process double in **`memory`**.
//! - **`correlation`**, **`events`**, **`dispatch`**: the pending-call table,
//!   the event registry and the single reader task that feeds both.
//! - **`outgoing`**, **`lifecycle`**, **`domains`**: fire-and-forget sends,
//!   remote object ownership and domain interest counts.
//! - **`connection`**: the [`Connection`] handle tying the above together.
//! - **`api`**: page-level helpers ([`Tab`], [`PageTracker`]).
//!
//! # Browser setup
//!
//! ```sh
//! google-chrome --remote-debugging-port=9222
//! ```
//!
//! # Example (conceptual)
//!
//! ```ignore
//! use devtap_client::{discovery, BrowserEndpoint, Connection, Tab};
//!
//! let targets = BrowserEndpoint::new("127.0.0.1", 9222).list_targets().await?;
//! let page = discovery::find_target(&targets, "example.com").unwrap();
//! let conn = Connection::connect(page.web_socket_debugger_url.as_deref().unwrap()).await?;
//!
//! let tab = Tab::new(conn.clone());
//! tab.enable("Page").await?;
//! let loaded = tab.wait_for_page_load()?;
//! tab.navigate("https://example.com").await?;
//! loaded.await?;
//! let title = tab.evaluate_value("document.title").await?;
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod discovery;
mod dispatch;
pub mod domains;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod outgoing;
pub mod protocol;
pub mod slot;
pub mod transport;
pub mod types;

pub use api::{PageActivity, PageTracker, Property, Tab};
pub use config::{ClientConfig, ConfigLoader};
pub use connection::Connection;
pub use discovery::BrowserEndpoint;
pub use error::{CdpError, RemoteError};
pub use events::{EventWait, ListenerId};
pub use lifecycle::{ObjectGroup, RemoteHandle};
pub use protocol::{CdpEvent, DomainEvent};
pub use transport::{ConnectionState, Transport, WebSocketTransport};
