//! Object store access, scene groups and table output.

mod scene_store;
mod store;
mod table_writer;

pub use scene_store::{read_metadata, read_scene, write_scene, SceneMetadata};
pub use store::{create_store, join_path, parse_s3_uri, store_prefix};
pub use table_writer::{to_csv, to_json, TableColumns, TableWriter};
