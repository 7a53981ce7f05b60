pub mod walk;

pub use walk::walk_files;
