//! # Property Graph Model
//!
//! Clean DTOs that define the property graph surface.
//! These types cross every boundary: storage ↔ translator ↔ execution ↔ user.
//!
//! Design rule: NO SQL types, NO rusqlite types here. This module is pure
//! data — no I/O, no state.

pub mod node;
pub mod path;
pub mod property_map;
pub mod relationship;
pub mod value;

pub use node::{Node, NodeId};
pub use path::Path;
pub use property_map::PropertyMap;
pub use relationship::{Direction, EdgeId, Relationship};
pub use value::Value;
