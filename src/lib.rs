//! Host side of the LogicX document plugin.
//!
//! LogicX documents are edited and simulated by a compute module shipped as a
//! WebAssembly component. This crate loads that component once, gives every open
//! document its own context inside it, and maps the host application's panel
//! lifecycle onto those contexts.
//!
//! # Core Concepts
//!
//! - [`ModuleLinker`]: Loads the compute module at most once. Callers that arrive
//! 	while the load is in flight wait for it; a failed load stays failed.
//!
//! - [`ComputeModule`] / [`ComputeContext`]: The capability the module provides.
//! 	[`WasmModule`] implements it on top of wasmtime; tests substitute fakes.
//!
//! - [`Session`]: Exclusively owns one context. Mirrors the context's
//! 	[`InteractionState`], updated only by the context's own notifications.
//!
//! - [`DocumentPanel`]: One per host panel. Never lets an error escape into the
//! 	host; failures leave the panel degraded with the toggle disabled.
//!
//! - [`InteractionToggle`]: The edit/play button. Renders what the session reports.
//!
//! - [`LogicxPlugin`]: Registers the view, the creation command and the settings
//! 	tab with the [`Host`].
//!
//! # Module World
//!
//! The component must export `logicx:module/document` with a `context` resource
//! and may import `logicx:module/host` for logging, panics and state
//! notifications. Messages it logs are forwarded to `tracing` under the
//! [`MODULE_LOG_TARGET`] target.
//!
//! # Example
//!
//! ```
//! use logicx_host::{ Engine, LinkerError, ModuleLinker, ModuleLoadError, ModuleStatus, WasmModuleLoader };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Builder::new_current_thread().build()?;
//! let engine = Engine::default();
//!
//! // A component that exports nothing is rejected when linked.
//! let loader = WasmModuleLoader::from_bytes( engine, b"(component)".as_slice() );
//! let linker = ModuleLinker::new( loader );
//!
//! let result = runtime.block_on( linker.load() );
//! assert!( matches!( result, Err( LinkerError::LoadFailed( ref err )) if matches!( **err, ModuleLoadError::MissingExports( _ ))));
//! assert!( matches!( linker.status(), ModuleStatus::Failed( _ )));
//! # Ok(())
//! # }
//! ```

mod capability ;
mod glue ;
mod wasm_module ;
mod module_linker ;
mod session ;
mod toggle ;
mod panel ;
mod host ;
mod settings ;
mod plugin ;

#[doc( no_inline )]
pub use wasmtime::Engine ;

pub use capability::{
	ComputeContext, ComputeModule, ContainerId, ContainerKind, ContextError, InteractionState,
	MountTarget, SerializedDocument, StateListener,
};
pub use glue::MODULE_LOG_TARGET ;
pub use wasm_module::{ WasmContext, WasmModule };
pub use module_linker::{
	Artifact, CompiledModule, LinkerError, ModuleLinker, ModuleLoadError, ModuleLoader, ModuleStatus,
	WasmModuleLoader,
};
pub use session::{ Session, SessionError, SessionId, SessionLifecycleError, StateObserver };
pub use toggle::{ Icon, InteractionToggle, ToggleButton };
pub use panel::{ DocumentPanel, PanelState, PanelStatus };
pub use host::{ CommandSpec, DocumentType, Host, HostError, VaultPath };
pub use settings::{ SettingOption, Settings, SettingsError, SettingsTab };
pub use plugin::{
	document_type, CreateComponentError, LogicxPlugin, PluginError, LEGACY_EXTENSION, LOGICX_EXTENSION, LOGICX_VIEW,
	NEW_COMPONENT_COMMAND_ID, NEW_COMPONENT_COMMAND_NAME, SETTINGS_TAB_TITLE,
};
