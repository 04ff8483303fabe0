//! Project lifecycle: the registry of loaded projects, reference expansion,
//! open-file assignment and declaration-map redirects.

pub mod expand;
pub mod graph;
pub mod open_files;
pub mod redirect;

pub use expand::{Direction, Expansion, expand_references, incoming_edges};
pub use graph::{BuiltProgram, ProjectGraph, ProjectInfo, ProjectState, Retainer};
pub use open_files::{Assignment, OpenFile, OpenFileTracker, assign_projects};
pub use redirect::{DeclarationMapResolver, defining_config};
