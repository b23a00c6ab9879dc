//! # qirust-serve
//!
//! A small web service that turns text into QR code images.
//!
//! Each generate request encodes the submitted text into a 256×256 PNG, writes
//! it under the public static directory with a nanosecond timestamp as its
//! name, and returns a page embedding it. A background sweeper deletes images
//! once they are older than the configured ttl.
//!
//! ## Example
//!
//! Encode and store an image, then sweep it away:
//!
//! ```rust,no_run
//! use qirust_serve::{encoder::encode, store::ArtifactStore, sweeper::{RetentionPolicy, Sweeper}};
//!
//! let store = ArtifactStore::new("static", "img");
//! let artifact = store.store(&encode("Hello, World!").unwrap()).unwrap();
//! println!("served at {}", artifact.url);
//!
//! let report = Sweeper::new(store.dir(), RetentionPolicy::default()).sweep_once();
//! println!("deleted {} expired images", report.deleted);
//! ```
//!
//! ## Modules
//!
//! - [`encoder`]: Text to fixed-size QR code bitmaps.
//! - [`store`]: Naming and writing images under the static root.
//! - [`sweeper`]: Age-based deletion running beside request handling.
//! - [`web`]: Routes, page rendering and static file serving.
//! - [`i18n`]: Translation catalogs and language selection.
//! - [`config`]: Command-line and environment configuration.

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod i18n;
pub mod store;
pub mod sweeper;
pub mod web;

pub use error::{Error, Result};
