//! Loading the compute module exactly once.
//!
//! A [`ModuleLinker`] wraps a [`ModuleLoader`] and guarantees that the loader runs
//! at most once no matter how many callers ask for the module, and that callers
//! arriving while the load is in flight wait for that same load. The outcome,
//! success or failure, is shared by every caller for the lifetime of the linker.

use std::path::PathBuf ;
use std::sync::Arc ;
use std::sync::atomic::{ AtomicBool, Ordering };
use async_trait::async_trait ;
use itertools::Itertools ;
use pipe_trait::Pipe ;
use thiserror::Error ;
use tokio::sync::watch ;
use tracing::{ error, info };
use wasmtime::Engine ;
use wasmtime::component::Component ;

use crate::capability::{ ComputeContext, ComputeModule, ContextError };
use crate::wasm_module::WasmModule ;



/// Errors that occur while compiling, linking or instantiating the compute module.
#[derive( Debug, Error )]
pub enum ModuleLoadError {
	/// The artifact could not be read from disk.
	#[error( "Failed to read module artifact {}: {source}", .path.display() )]
	Read { path: PathBuf, #[source] source: std::io::Error },
	/// The artifact is not a valid component.
	#[error( "Failed to compile module: {0}" )] Compile( wasmtime::Error ),
	/// A host import could not be added to the linker.
	#[error( "Failed to link {0}: {1}" )] Link( String, wasmtime::Error ),
	/// Instantiation failed: a missing import or a trap during initialisation.
	#[error( "Failed to instantiate module: {0}" )] Instantiate( wasmtime::Error ),
	/// The instance does not export the document interface it must export.
	#[error( "Module is missing exports: {}", .0.iter().join( ", " ))] MissingExports( Vec<String> ),
	/// The background compilation task died.
	#[error( "Module load task failed: {0}" )] Task( String ),
}

/// Errors returned to callers of the [`ModuleLinker`].
#[derive( Debug, Error, Clone )]
pub enum LinkerError {
	/// The load has not completed yet.
	#[error( "Module Not Ready" )] ModuleNotReady,
	/// The load failed. Sticky: the linker never retries.
	#[error( "Module Load Failed: {0}" )] LoadFailed( Arc<ModuleLoadError> ),
}

/// Handle to a linked compute module. Cheap to clone, read-only, shared by all sessions.
#[derive( Clone )]
pub struct CompiledModule( Arc<dyn ComputeModule> );

impl CompiledModule {
	pub fn new( module: impl ComputeModule + 'static ) -> Self { Self( Arc::new( module ))}

	/// Creates a fresh context in the module.
	///
	/// # Errors
	/// Propagates whatever the module reports.
	pub fn create_context( &self ) -> Result<Box<dyn ComputeContext>, ContextError> {
		self.0.create_context()
	}
}

impl std::fmt::Debug for CompiledModule {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_tuple( "CompiledModule" ).field( &"<ComputeModule>" ).finish()
	}
}

/// Produces a [`CompiledModule`]. Called at most once per [`ModuleLinker`].
#[async_trait]
pub trait ModuleLoader: Send + Sync {
	/// # Errors
	/// Any failure to produce a ready module.
	async fn load( &self ) -> Result<CompiledModule, ModuleLoadError> ;
}

/// Where the component bytes come from.
#[derive( Debug, Clone )]
pub enum Artifact {
	/// Bytes bundled with the application (binary or WAT text).
	Bytes( Arc<[u8]> ),
	/// A component file on disk.
	File( PathBuf ),
}

/// Loads the compute module from a component artifact with wasmtime.
///
/// The engine is supplied by the embedder so its configuration stays theirs.
/// Compilation runs on the blocking pool.
#[derive( Debug, Clone )]
pub struct WasmModuleLoader {
	engine: Engine,
	artifact: Artifact,
}

impl WasmModuleLoader {
	pub fn new( engine: Engine, artifact: Artifact ) -> Self { Self { engine, artifact }}

	pub fn from_bytes( engine: Engine, bytes: impl Into<Arc<[u8]>> ) -> Self {
		Self::new( engine, Artifact::Bytes( bytes.into() ))
	}

	pub fn from_file( engine: Engine, path: impl Into<PathBuf> ) -> Self {
		Self::new( engine, Artifact::File( path.into() ))
	}
}

#[async_trait]
impl ModuleLoader for WasmModuleLoader {
	async fn load( &self ) -> Result<CompiledModule, ModuleLoadError> {

		let bytes: Arc<[u8]> = match &self.artifact {
			Artifact::Bytes( bytes ) => Arc::clone( bytes ),
			Artifact::File( path ) => tokio::fs::read( path ).await
				.map_err(| source | ModuleLoadError::Read { path: path.clone(), source })?
				.into(),
		};

		let engine = self.engine.clone();
		tokio::task::spawn_blocking( move || {
			let component = Component::new( &engine, &*bytes ).map_err( ModuleLoadError::Compile )?;
			WasmModule::instantiate( &engine, &component )
		})
			.await
			.map_err(| err | ModuleLoadError::Task( err.to_string() ))??
			.pipe( CompiledModule::new )
			.pipe( Ok )

	}
}

/// Where the linker is in its single load.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum ModuleStatus {
	/// Nobody has asked for the module yet, or the load is in flight.
	Pending,
	Ready,
	/// The load failed with the given message.
	Failed( String ),
}

type Outcome = Result<CompiledModule, Arc<ModuleLoadError>> ;

/// Runs a [`ModuleLoader`] at most once and shares its outcome.
///
/// The load runs in a task the linker spawns on first demand, not inside any
/// caller's future, so a caller that gives up waiting never restarts it.
pub struct ModuleLinker {
	loader: Arc<dyn ModuleLoader>,
	started: AtomicBool,
	outcome: Arc<watch::Sender<Option<Outcome>>>,
}

impl std::fmt::Debug for ModuleLinker {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "ModuleLinker" )
			.field( "status", &self.status() )
			.finish_non_exhaustive()
	}
}

impl ModuleLinker {

	pub fn new( loader: impl ModuleLoader + 'static ) -> Self {
		let ( outcome, _ ) = watch::channel( None );
		Self { loader: Arc::new( loader ), started: AtomicBool::new( false ), outcome: Arc::new( outcome ) }
	}

	/// Starts the load in the background unless it has already been started.
	///
	/// Must be called from within a tokio runtime. The load runs to completion
	/// even if every caller stops waiting for it.
	pub fn start( &self ) {

		if self.started.swap( true, Ordering::AcqRel ) { return }

		let loader = Arc::clone( &self.loader );
		let outcome = Arc::clone( &self.outcome );
		tokio::spawn( async move {
			info!( "linking compute module" );
			let result = match loader.load().await {
				Ok( module ) => {
					info!( "compute module ready" );
					Ok( module )
				},
				Err( err ) => {
					error!( %err, "compute module failed to load" );
					Err( Arc::new( err ))
				},
			};
			outcome.send_replace( Some( result ));
		});

	}

	/// Returns the linked module, starting the load first if nobody has yet.
	///
	/// Concurrent callers share the in-flight load; the loader is never invoked
	/// twice. Callers queue here rather than failing while the load is pending.
	///
	/// # Errors
	/// Returns [`LinkerError::LoadFailed`] if the single load failed.
	pub async fn load( &self ) -> Result<CompiledModule, LinkerError> {
		self.start();
		let mut receiver = self.outcome.subscribe();
		let outcome = receiver.wait_for( Option::is_some ).await
			.map_err(| _ | LinkerError::ModuleNotReady )?;
		resolve( outcome.as_ref() )
	}

	/// Returns the module without waiting.
	///
	/// # Errors
	/// [`LinkerError::ModuleNotReady`] while the load is pending or was never
	/// started, [`LinkerError::LoadFailed`] if it failed.
	pub fn try_module( &self ) -> Result<CompiledModule, LinkerError> {
		resolve( self.outcome.borrow().as_ref() )
	}

	pub fn status( &self ) -> ModuleStatus {
		match self.outcome.borrow().as_ref() {
			Some( Ok( _ )) => ModuleStatus::Ready,
			Some( Err( err )) => ModuleStatus::Failed( err.to_string() ),
			None => ModuleStatus::Pending,
		}
	}

}

fn resolve( outcome: Option<&Outcome> ) -> Result<CompiledModule, LinkerError> {
	match outcome {
		Some( Ok( module )) => Ok( module.clone() ),
		Some( Err( err )) => Err( LinkerError::LoadFailed( Arc::clone( err ))),
		None => Err( LinkerError::ModuleNotReady ),
	}
}
