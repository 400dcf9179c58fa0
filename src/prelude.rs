//! nodebridge public prelude.
//! Import with: `use nodebridge::prelude::*;`

pub use crate::bus::{BusError, BusEventFilter, BusInterface};
pub use crate::config::{Config, HubSettings};
pub use crate::descriptions::{NodeDescription, VariableRef};
pub use crate::error::{ReadFailure, ResolutionError};
pub use crate::hub::{Hub, HubListener, ReadMode};
pub use crate::script::{DeclarationCompiler, ScriptBundle, ScriptCompiler};
pub use crate::subscriptions::{EventFilter, EventNotice};
pub use crate::wire::{NodeId, WireMessage};
