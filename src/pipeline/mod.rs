//! Pipeline stages and the collaborators they call.
//!
//! Each submodule does one step, so each can be tested alone and any
//! collaborator can be swapped without touching the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ extract ──▶ persist ──▶ sheet
//! (upload)  (base64)   (VLM/JSON)  (store)     (append row)
//!              │
//!              └──▶ detect (seeding an empty registry)
//! ```
//!
//! 1. [`input`]: sniff uploads and build pending files (PDF via `render`
//!    with the `pdf` feature)
//! 2. [`encode`]: cap, PNG-encode and base64-wrap a preview; `spawn_blocking`
//! 3. [`extract`]: read field values; [`llm`] and [`response`] back the VLM
//!    implementation
//! 4. [`detect`]: propose fields on a blank registry
//! 5. [`persist`]: write completed files to a document store
//! 6. [`sheet`]: append one row per completed file to a spreadsheet

pub mod detect;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod persist;
#[cfg(feature = "pdf")]
pub mod render;
pub mod response;
pub mod sheet;
