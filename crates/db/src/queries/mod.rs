// crates/db/src/queries/mod.rs
// Query modules, each adding methods to `Database`.

pub mod recordings;
