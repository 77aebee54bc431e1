//! # Reconcile
//!
//! The reconciliation engine behind `tangosync`: given a desired
//! configuration tree and the current state of the TANGO database, compute
//! the minimal ordered list of database calls that converge the database
//! to the desired state.
//!
//! ## Core concepts
//!
//! - **[`ConfigTree`]**: servers → instances → classes → devices plus a
//!   parallel `classes` root, built on caseless-but-case-preserving maps
//! - **[`DbCall`]**: one database mutation, typed per operation
//! - **[`DatabaseClient`]**: the seam to any actual database; the engine
//!   ships a recording client and a snapshot-backed one
//! - **[`configure`]**: the pure diff — no I/O, idempotent by construction
//!
//! ## Example
//!
//! ```
//! use reconcile::{ConfigTree, ReconcileOptions, configure};
//!
//! let mut desired = ConfigTree::new();
//! desired
//!     .ensure_device("TangoTest", "test", "TangoTest", "sys/tg_test/1")
//!     .properties_mut()
//!     .insert("interval", vec!["50".to_string()]);
//!
//! let current = ConfigTree::new();
//! let calls = configure(&desired, &current, &ReconcileOptions::default()).unwrap();
//! // one add_device, one put_device_property
//! assert_eq!(calls.len(), 2);
//! ```

pub mod calls;
pub mod configure;
pub mod database;
pub mod error;
pub mod filtering;
pub mod property;
pub mod server;
pub mod tree;

// Re-export main types at crate root
pub use calls::{DbCall, DeviceInfo};
pub use configure::{ReconcileOptions, configure};
pub use database::{CallRecorder, DatabaseClient, InMemoryDatabase, dispatch};
pub use error::{Error, Result};
pub use filtering::{CLASSES_LEVELS, SERVERS_LEVELS, filter_config};
pub use property::{
    PROTECTED_PROPERTIES, SPECIAL_ATTRIBUTE_PROPERTIES, check_attribute_property,
    diff_attribute_properties, diff_properties, is_protected,
};
pub use server::{
    Collision, find_collisions, find_empty_servers, update_class, update_device, update_server,
};
pub use tree::{
    AttributeProperties, CaselessMap, ClassConfig, ClassDevices, ConfigTree, DeviceConfig,
    InstanceClasses, Properties, PropertyValue, ServerInstances, merge_appending, merge_values,
    server_id, string_list, validate_device_name,
};
