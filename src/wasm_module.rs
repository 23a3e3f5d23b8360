//! The compute module as a WebAssembly component instance.
//!
//! One [`WasmModule`] owns one wasmtime [`Store`] holding one component instance.
//! Every [`ComputeContext`] it creates is a `context` resource inside that instance,
//! so all calls go through the same store and are serialized by its mutex.
//! A state listener runs while that mutex is held; calls it makes into the module
//! fail with [`ContextError::Reentrant`].

use std::sync::{ Arc, Mutex };
use tracing::{ debug, warn };
use wasmtime::{ Engine, Store };
use wasmtime::component::{ Component, Func, Instance, Linker, ResourceAny, Val };

use crate::capability::{
	ComputeContext, ComputeModule, ContainerId, ContextError, InteractionState,
	SerializedDocument, StateListener,
};
use crate::glue::{ self, ExportTable, Glue, ModuleState, DOCUMENT_INTERFACE };
use crate::module_linker::ModuleLoadError ;



/// A linked compute module backed by a wasmtime component instance.
///
/// Cloning is cheap; clones share the instance.
#[derive( Clone )]
pub struct WasmModule {
	inner: Arc<ModuleInner>,
}

struct ModuleInner {
	glue: Arc<Glue>,
	store: Mutex<Store<ModuleState>>,
}

impl std::fmt::Debug for WasmModule {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "WasmModule" )
			.field( "store", &"<Store>" )
			.field( "panic_message", &self.inner.glue.panic_message() )
			.finish_non_exhaustive()
	}
}

impl WasmModule {

	/// Instantiates `component` and binds its exports.
	///
	/// The glue backing the host imports exists before the instance does and is
	/// bound to the instance's exports afterwards.
	///
	/// # Errors
	/// Fails if the host imports can't be linked, if instantiation fails (missing
	/// imports, a trap during initialisation), or if the instance lacks any of the
	/// `logicx:module/document` exports.
	pub fn instantiate( engine: &Engine, component: &Component ) -> Result<Self, ModuleLoadError> {

		let glue = Arc::new( Glue::unbound() );

		let mut linker = Linker::new( engine );
		glue::link_host_imports( &mut linker )?;

		let mut store = Store::new( engine, ModuleState { glue: Arc::clone( &glue ) });
		let instance = linker.instantiate( &mut store, component ).map_err( ModuleLoadError::Instantiate )?;

		glue.bind( resolve_exports( &mut store, &instance )? );

		Ok( Self { inner: Arc::new( ModuleInner { glue, store: Mutex::new( store ) })})

	}

	/// The message the module reported through its panic hook, if it ever did.
	pub fn panic_message( &self ) -> Option<String> {
		self.inner.glue.panic_message().map( str::to_string )
	}

}

fn resolve_exports( store: &mut Store<ModuleState>, instance: &Instance ) -> Result<ExportTable, ModuleLoadError> {

	let interface = instance.get_export_index( &mut *store, None, DOCUMENT_INTERFACE )
		.ok_or_else(|| ModuleLoadError::MissingExports( vec![ DOCUMENT_INTERFACE.to_string() ]))?;

	let mut missing = Vec::new();
	let mut lookup = | name: &str | {
		let func = instance.get_export_index( &mut *store, Some( &interface ), name )
			.and_then(| index | instance.get_func( &mut *store, index ));
		if func.is_none() { missing.push( format!( "{}#{}", DOCUMENT_INTERFACE, name )); }
		func
	};

	let exports = (
		lookup( ExportTable::CONSTRUCTOR ),
		lookup( ExportTable::GET_DATA ),
		lookup( ExportTable::SET_DATA ),
		lookup( ExportTable::CLEAR ),
		lookup( ExportTable::MOUNT ),
		lookup( ExportTable::GET_STATE ),
		lookup( ExportTable::SET_STATE ),
	);

	match exports {
		( Some( constructor ), Some( get_data ), Some( set_data ), Some( clear ), Some( mount ), Some( get_state ), Some( set_state )) =>
			Ok( ExportTable { constructor, get_data, set_data, clear, mount, get_state, set_state }),
		_ => Err( ModuleLoadError::MissingExports( missing )),
	}

}

impl ModuleInner {

	const PLACEHOLDER_VAL: Val = Val::Tuple( vec![] );

	fn call(
		&self,
		pick: impl FnOnce( &ExportTable ) -> Func,
		args: &[Val],
		has_return: bool,
	) -> Result<Option<Val>, ContextError> {

		if self.glue.is_dispatching() { return Err( ContextError::Reentrant ) }
		let func = pick( self.glue.exports()? );
		let mut store = self.store.lock().map_err(|_| ContextError::LockRejected )?;

		let mut buffer = match has_return {
			true => vec![ Self::PLACEHOLDER_VAL ],
			false => Vec::with_capacity( 0 ),
		};

		if let Err( err ) = func.call( &mut *store, args, &mut buffer ) {
			if let Some( message ) = self.glue.panic_message() {
				warn!( %message, "call trapped after the module panicked" );
			}
			return Err( ContextError::RuntimeException( err ));
		}
		let _ = func.post_return( &mut *store );

		Ok( match has_return {
			true => Some( buffer.pop().ok_or_else(|| ContextError::UnexpectedResponse( "missing response".to_string() ))? ),
			false => None,
		})

	}

}

impl ComputeModule for WasmModule {
	fn create_context( &self ) -> Result<Box<dyn ComputeContext>, ContextError> {

		let id = self.inner.glue.next_context_id();
		let handle = match self.inner.call(| exports | exports.constructor, &[ Val::U64( id )], true )? {
			Some( Val::Resource( handle )) => handle,
			other => return Err( ContextError::UnexpectedResponse( format!( "expected a context resource, got {:?}", other ))),
		};

		debug!( context = id, "created module context" );
		Ok( Box::new( WasmContext { id, handle: Some( handle ), module: Arc::clone( &self.inner )}))

	}
}

/// One `context` resource of a [`WasmModule`].
pub struct WasmContext {
	id: u64,
	handle: Option<ResourceAny>,
	module: Arc<ModuleInner>,
}

impl std::fmt::Debug for WasmContext {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "WasmContext" )
			.field( "id", &self.id )
			.field( "released", &self.handle.is_none() )
			.finish_non_exhaustive()
	}
}

impl WasmContext {

	fn call_method(
		&self,
		pick: impl FnOnce( &ExportTable ) -> Func,
		args: impl IntoIterator<Item = Val>,
		has_return: bool,
	) -> Result<Option<Val>, ContextError> {
		let handle = self.handle.ok_or( ContextError::Released )?;
		let args = std::iter::once( Val::Resource( handle )).chain( args ).collect::<Vec<_>>();
		self.module.call( pick, &args, has_return )
	}

}

impl ComputeContext for WasmContext {

	fn get_data( &mut self ) -> Result<SerializedDocument, ContextError> {
		match self.call_method(| exports | exports.get_data, [], true )? {
			Some( Val::String( data )) => Ok( SerializedDocument::from( data )),
			other => Err( ContextError::UnexpectedResponse( format!( "expected a string, got {:?}", other ))),
		}
	}

	fn set_data( &mut self, data: &SerializedDocument, clear: bool ) -> Result<(), ContextError> {
		self.call_method(| exports | exports.set_data, [ Val::String( data.as_str().to_string() ), Val::Bool( clear )], false )
			.map( drop )
	}

	fn clear( &mut self ) -> Result<(), ContextError> {
		self.call_method(| exports | exports.clear, [], false ).map( drop )
	}

	fn mount( &mut self, container: ContainerId ) -> Result<(), ContextError> {
		self.call_method(| exports | exports.mount, [ Val::U64( container.0 )], false ).map( drop )
	}

	fn get_state( &mut self ) -> Result<InteractionState, ContextError> {
		match self.call_method(| exports | exports.get_state, [], true )? {
			Some( Val::Record( fields )) => fields.into_iter()
				.find_map(|( name, value )| match ( name.as_str(), value ) {
					( "edit", Val::Bool( edit )) => Some( InteractionState { edit }),
					_ => None,
				})
				.ok_or_else(|| ContextError::UnexpectedResponse( "state record without an edit flag".to_string() )),
			other => Err( ContextError::UnexpectedResponse( format!( "expected a state record, got {:?}", other ))),
		}
	}

	fn set_state( &mut self, state: InteractionState ) -> Result<(), ContextError> {
		let record = Val::Record( vec![( "edit".to_string(), Val::Bool( state.edit ))]);
		self.call_method(| exports | exports.set_state, [ record ], false ).map( drop )
	}

	fn on_state_changed( &mut self, listener: StateListener ) -> Result<(), ContextError> {
		if self.handle.is_none() { return Err( ContextError::Released ); }
		self.module.glue.set_listener( self.id, listener )
	}

	fn remove_state_listener( &mut self ) {
		self.module.glue.remove_listener( self.id );
	}

	fn release( &mut self ) -> Result<(), ContextError> {
		if self.module.glue.is_dispatching() { return Err( ContextError::Reentrant ) }
		let handle = self.handle.take().ok_or( ContextError::Released )?;
		self.module.glue.remove_listener( self.id );
		let mut store = self.module.store.lock().map_err(|_| ContextError::LockRejected )?;
		handle.resource_drop( &mut *store ).map_err( ContextError::RuntimeException )?;
		debug!( context = self.id, "released module context" );
		Ok(())
	}

}

impl Drop for WasmContext {
	fn drop( &mut self ) {
		if self.handle.is_some() {
			if let Err( err ) = self.release() {
				warn!( context = self.id, %err, "failed to release module context on drop" );
			}
		}
	}
}
