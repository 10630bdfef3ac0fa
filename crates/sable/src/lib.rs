//
// lib.rs
//
// sable: a language server for the Sable language
//

pub mod backend;
pub mod buffering;
pub mod progress;
pub mod rename;
pub mod state;
pub mod workspace_index;
