//! The plugin entry point the host talks to.

use std::sync::Arc ;
use nonempty_collections::nev ;
use thiserror::Error ;
use tracing::{ debug, error, info, warn };

use crate::capability::SerializedDocument ;
use crate::host::{ CommandSpec, DocumentType, Host, HostError, VaultPath };
use crate::module_linker::{ LinkerError, ModuleLinker, ModuleLoader };
use crate::panel::DocumentPanel ;
use crate::session::{ Session, SessionError };
use crate::settings::Settings ;
use crate::toggle::{ InteractionToggle, ToggleButton };



/// View type the host routes LogicX files to.
pub const LOGICX_VIEW: &str = "logicx-view" ;
/// Extension of files created by the plugin.
pub const LOGICX_EXTENSION: &str = "logicx" ;
/// Accepted for files written by older tools.
pub const LEGACY_EXTENSION: &str = "logic" ;
pub const NEW_COMPONENT_COMMAND_ID: &str = "new-logicx-component" ;
pub const NEW_COMPONENT_COMMAND_NAME: &str = "New LogicX Component" ;
pub const SETTINGS_TAB_TITLE: &str = "LogicX" ;

const COMPONENT_STEM: &str = "component" ;
const MAX_NAME_ATTEMPTS: usize = 1000 ;

/// The document type registered with the host.
pub fn document_type() -> DocumentType {
	DocumentType {
		view_type: LOGICX_VIEW.to_string(),
		extensions: nev![ LOGICX_EXTENSION.to_string(), LEGACY_EXTENSION.to_string() ],
	}
}

/// Errors from wiring the plugin into the host.
#[derive( Debug, Error )]
pub enum PluginError {
	/// The host refused a view, command or settings tab registration.
	#[error( "Registration Failed: {0}" )] Registration( #[from] HostError ),
	#[error( "Plugin Unloaded" )] Unloaded,
}

#[derive( Debug, Error )]
pub enum CreateComponentError {
	#[error( "Module Error: {0}" )] Module( #[from] LinkerError ),
	#[error( "Session Error: {0}" )] Session( #[from] SessionError ),
	#[error( "Host Error: {0}" )] Host( #[from] HostError ),
	/// Every candidate name in the folder is taken.
	#[error( "No free component name in {0}" )] NoFreeName( VaultPath ),
	/// The plugin was unloaded.
	#[error( "Plugin Unloaded" )] Unloaded,
}

/// Owns the module linker and wires the plugin into the host.
pub struct LogicxPlugin {
	host: Arc<dyn Host>,
	linker: Option<Arc<ModuleLinker>>,
	settings: Settings,
}

impl std::fmt::Debug for LogicxPlugin {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "LogicxPlugin" )
			.field( "linker", &self.linker )
			.field( "settings", &self.settings )
			.finish_non_exhaustive()
	}
}

impl LogicxPlugin {

	pub fn new( host: Arc<dyn Host>, loader: impl ModuleLoader + 'static, settings: Settings ) -> Self {
		Self { host, linker: Some( Arc::new( ModuleLinker::new( loader ))), settings }
	}

	/// `None` once the plugin is unloaded.
	#[inline] pub fn linker( &self ) -> Option<&Arc<ModuleLinker>> { self.linker.as_ref() }
	#[inline] pub fn settings( &self ) -> &Settings { &self.settings }

	/// Starts loading the compute module in the background and registers the
	/// view, the creation command and the settings tab.
	///
	/// Must be called from within a tokio runtime.
	///
	/// # Errors
	/// [`PluginError::Registration`] if the host refused a registration. The load
	/// keeps running regardless.
	pub fn on_load( &mut self ) -> Result<(), PluginError> {

		self.linker.as_ref().ok_or( PluginError::Unloaded )?.start();

		self.host.register_view( &document_type() )?;
		self.host.register_command( &CommandSpec {
			id: NEW_COMPONENT_COMMAND_ID.to_string(),
			name: NEW_COMPONENT_COMMAND_NAME.to_string(),
		})?;
		self.host.register_settings_tab( &self.settings.tab( SETTINGS_TAB_TITLE ))?;

		info!( view = LOGICX_VIEW, "plugin loaded" );
		Ok(())

	}

	/// Builds the adapter for a panel the host just created.
	///
	/// Returns `None` once the plugin is unloaded.
	pub fn open_panel( &self, button: impl ToggleButton + 'static ) -> Option<DocumentPanel> {
		let Some( linker ) = self.linker.as_ref() else {
			warn!( "panel requested after unload" );
			return None ;
		};
		Some( DocumentPanel::new( Arc::clone( linker ), Arc::clone( &self.host ), InteractionToggle::new( button )))
	}

	/// Creates a fresh component next to `active_file` (or in the vault root) and opens it.
	///
	/// Existing files are never overwritten; the first free name among
	/// `component.logicx`, `component 1.logicx`, `component 2.logicx`, ... is used.
	///
	/// # Errors
	/// The module is unavailable, the empty document could not be produced, or the host failed.
	pub async fn create_component( &self, active_file: Option<&VaultPath> ) -> Result<VaultPath, CreateComponentError> {

		let linker = self.linker.as_ref().ok_or( CreateComponentError::Unloaded )?;
		let module = linker.load().await?;

		let data = {
			let mut session = Session::open( &module, None )?;
			let data = session.get_data()?;
			session.teardown()?;
			data
		};

		let folder = active_file.and_then( VaultPath::parent ).unwrap_or_default();
		let path = self.write_fresh( &folder, &data ).await?;
		self.host.open_in_new_panel( &path ).await?;

		info!( %path, "component created" );
		Ok( path )

	}

	async fn write_fresh( &self, folder: &VaultPath, data: &SerializedDocument ) -> Result<VaultPath, CreateComponentError> {
		for attempt in 0..MAX_NAME_ATTEMPTS {
			let path = folder.join( &component_file_name( attempt ));
			match self.host.create_file( &path, data ).await {
				Ok(()) => return Ok( path ),
				Err( HostError::AlreadyExists( taken )) => debug!( %taken, "component name taken" ),
				Err( err ) => return Err( err.into() ),
			}
		}
		Err( CreateComponentError::NoFreeName( folder.clone() ))
	}

	/// Dispatches a command-palette invocation.
	///
	/// Returns whether the command belongs to this plugin. Failures are reported to
	/// the user through a notice.
	pub async fn on_command( &self, id: &str, active_file: Option<&VaultPath> ) -> bool {
		if id != NEW_COMPONENT_COMMAND_ID { return false }
		if let Err( err ) = self.create_component( active_file ).await {
			error!( %err, "failed to create component" );
			self.host.notice( &format!( "Could not create a LogicX component: {}", err ));
		}
		true
	}

	/// Drops the plugin's handle on the module.
	///
	/// A load in flight still completes for the panels waiting on it; open panels
	/// keep the module alive until they close.
	pub fn on_unload( &mut self ) {
		if self.linker.take().is_some() { info!( "plugin unloaded" ); }
	}

}

impl Drop for LogicxPlugin {
	fn drop( &mut self ) { self.on_unload() }
}

fn component_file_name( attempt: usize ) -> String {
	match attempt {
		0 => format!( "{}.{}", COMPONENT_STEM, LOGICX_EXTENSION ),
		n => format!( "{} {}.{}", COMPONENT_STEM, n, LOGICX_EXTENSION ),
	}
}
