//! Symlink views: render path templates from cache rows into a
//! deduplicated symlink tree.

pub mod symlinks;
pub mod template;

pub use symlinks::{
    cleanup_output_dir, create_symlink_tree, make_unique_path, sanitize_path_segment,
    sanitize_rendered_path,
};
pub use template::{template_variables, PathTemplate};
