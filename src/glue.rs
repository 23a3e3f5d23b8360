//! The binding layer between the host and the raw module exports.
//!
//! The compute module imports `logicx:module/host` and the host calls back into
//! `logicx:module/document`. Both sides meet in the [`Glue`]: it is created unbound,
//! handed to the module as the backing of its host imports, and only bound to the
//! module's export table once instantiation has produced one.

use std::collections::HashMap ;
use std::sync::{ Arc, Mutex, OnceLock };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::thread::{ self, ThreadId };
use thiserror::Error ;
use tracing::{ debug, error, info, trace, warn };
use wasmtime::component::{ Func, Linker, Val };

use crate::capability::{ ContextError, InteractionState, StateListener };
use crate::module_linker::ModuleLoadError ;



pub(crate) const HOST_INTERFACE: &str = "logicx:module/host" ;
pub(crate) const DOCUMENT_INTERFACE: &str = "logicx:module/document" ;

/// Target under which messages logged by the module are emitted.
pub const MODULE_LOG_TARGET: &str = "logicx::module" ;

/// Store data of the module instance.
pub(crate) struct ModuleState {
	pub(crate) glue: Arc<Glue>,
}

/// Raw exports of the `context` resource.
#[derive( Clone, Copy, Debug )]
pub(crate) struct ExportTable {
	pub constructor: Func,
	pub get_data: Func,
	pub set_data: Func,
	pub clear: Func,
	pub mount: Func,
	pub get_state: Func,
	pub set_state: Func,
}

impl ExportTable {
	pub const CONSTRUCTOR: &'static str = "[constructor]context" ;
	pub const GET_DATA: &'static str = "[method]context.get-data" ;
	pub const SET_DATA: &'static str = "[method]context.set-data" ;
	pub const CLEAR: &'static str = "[method]context.clear" ;
	pub const MOUNT: &'static str = "[method]context.mount" ;
	pub const GET_STATE: &'static str = "[method]context.get-state" ;
	pub const SET_STATE: &'static str = "[method]context.set-state" ;
}

/// Errors returned to the module when it calls a host import incorrectly.
#[derive( Debug, Error )]
pub(crate) enum HostCallError {
	#[error( "Invalid arguments to {0}" )] InvalidArguments( &'static str ),
}

/// A registered listener; `None` while it is running.
type ListenerSlot = Option<StateListener> ;

pub(crate) struct Glue {
	exports: OnceLock<ExportTable>,
	listeners: Mutex<HashMap<u64, ListenerSlot>>,
	dispatching: Mutex<Option<ThreadId>>,
	next_context_id: AtomicU64,
	panic_message: OnceLock<String>,
}

impl Glue {

	pub fn unbound() -> Self {
		Self {
			exports: OnceLock::new(),
			listeners: Mutex::new( HashMap::new() ),
			dispatching: Mutex::new( None ),
			next_context_id: AtomicU64::new( 0 ),
			panic_message: OnceLock::new(),
		}
	}

	/// Completes the import cycle. Binding twice is a no-op.
	pub fn bind( &self, exports: ExportTable ) {
		if self.exports.set( exports ).is_err() {
			warn!( "module exports were already bound" );
		}
	}

	pub fn exports( &self ) -> Result<&ExportTable, ContextError> {
		self.exports.get().ok_or( ContextError::ModuleNotReady )
	}

	pub fn next_context_id( &self ) -> u64 {
		self.next_context_id.fetch_add( 1, Ordering::Relaxed )
	}

	/// The message the module reported through its panic hook, if it ever did.
	pub fn panic_message( &self ) -> Option<&str> {
		self.panic_message.get().map( String::as_str )
	}

	/// Listeners are dropped outside the registry lock since they may own contexts.
	pub fn set_listener( &self, context: u64, listener: StateListener ) -> Result<(), ContextError> {
		let replaced = self.listeners.lock().map_err(|_| ContextError::LockRejected )?
			.insert( context, Some( listener ));
		drop( replaced );
		Ok(())
	}

	pub fn remove_listener( &self, context: u64 ) {
		let removed = match self.listeners.lock() {
			Ok( mut listeners ) => listeners.remove( &context ),
			Err( _ ) => {
				warn!( context, "listener registry poisoned, listener not removed" );
				None
			},
		};
		drop( removed );
	}

	/// Whether the calling thread is inside a state listener. The store is
	/// locked for the whole call that triggered it, so calling back into the
	/// module from there can't succeed.
	pub fn is_dispatching( &self ) -> bool {
		self.dispatching.lock().is_ok_and(| owner | *owner == Some( thread::current().id() ))
	}

	/// Runs the context's listener without holding the registry lock.
	fn notify( &self, context: u64, state: InteractionState ) {
		let Some( mut listener ) = self.take_listener( context, state ) else { return };
		self.set_dispatching( Some( thread::current().id() ));
		listener( state );
		self.set_dispatching( None );
		self.restore_listener( context, listener );
	}

	fn take_listener( &self, context: u64, state: InteractionState ) -> Option<StateListener> {
		let Ok( mut listeners ) = self.listeners.lock() else {
			warn!( context, "listener registry poisoned, state change dropped" );
			return None ;
		};
		match listeners.get_mut( &context ) {
			Some( slot ) => slot.take().or_else(|| {
				debug!( context, edit = state.edit, "state change while the listener is running" );
				None
			}),
			None => {
				debug!( context, edit = state.edit, "state change for a context without listener" );
				None
			},
		}
	}

	/// Puts a listener back unless it was removed or replaced while it ran.
	fn restore_listener( &self, context: u64, listener: StateListener ) {
		let stale = match self.listeners.lock() {
			Ok( mut listeners ) => match listeners.get_mut( &context ) {
				Some( slot ) if slot.is_none() => {
					*slot = Some( listener );
					None
				},
				_ => Some( listener ),
			},
			Err( _ ) => Some( listener ),
		};
		drop( stale );
	}

	fn set_dispatching( &self, thread: Option<ThreadId> ) {
		match self.dispatching.lock() {
			Ok( mut dispatching ) => *dispatching = thread,
			Err( _ ) => warn!( "dispatch marker poisoned" ),
		}
	}

	fn record_panic( &self, message: String ) {
		error!( target: MODULE_LOG_TARGET, %message, "compute module panicked" );
		let _ = self.panic_message.set( message );
	}

}

/// Registers the `logicx:module/host` imports. Each of them reaches the [`Glue`]
/// through the store data, so they work before the glue is bound.
pub(crate) fn link_host_imports( linker: &mut Linker<ModuleState> ) -> Result<(), ModuleLoadError> {

	let mut root = linker.root();
	let mut host = root.instance( HOST_INTERFACE )
		.map_err(| err | ModuleLoadError::Link( HOST_INTERFACE.to_string(), err ))?;

	host.func_new( "log", | _ctx, _ty, args, _results | match args {
		[ Val::Enum( level ), Val::String( message )] => { forward_log( level, message ); Ok(()) },
		_ => Err( wasmtime::Error::new( HostCallError::InvalidArguments( "log" ))),
	}).map_err(| err | ModuleLoadError::Link( "log".to_string(), err ))?;

	host.func_new( "panic", | ctx, _ty, args, _results | match args {
		[ Val::String( message )] => { ctx.data().glue.record_panic( message.clone() ); Ok(()) },
		_ => Err( wasmtime::Error::new( HostCallError::InvalidArguments( "panic" ))),
	}).map_err(| err | ModuleLoadError::Link( "panic".to_string(), err ))?;

	host.func_new( "state-changed", | ctx, _ty, args, _results | match args {
		[ Val::U64( context ), Val::Bool( edit )] => {
			ctx.data().glue.notify( *context, InteractionState { edit: *edit });
			Ok(())
		},
		_ => Err( wasmtime::Error::new( HostCallError::InvalidArguments( "state-changed" ))),
	}).map_err(| err | ModuleLoadError::Link( "state-changed".to_string(), err ))?;

	Ok(())

}

fn forward_log( level: &str, message: &str ) {
	match level {
		"trace" => trace!( target: MODULE_LOG_TARGET, "{}", message ),
		"debug" => debug!( target: MODULE_LOG_TARGET, "{}", message ),
		"info" => info!( target: MODULE_LOG_TARGET, "{}", message ),
		"warn" => warn!( target: MODULE_LOG_TARGET, "{}", message ),
		_ => error!( target: MODULE_LOG_TARGET, "{}", message ),
	}
}

#[cfg( test )]
mod tests {

	use std::sync::{ Arc, Mutex };
	use super::* ;

	#[test]
	fn unbound_glue_is_not_ready() {
		let glue = Glue::unbound();
		assert!( matches!( glue.exports(), Err( ContextError::ModuleNotReady )));
	}

	#[test]
	fn notifications_reach_only_their_context() {
		let glue = Glue::unbound();
		let seen = Arc::new( Mutex::new( Vec::new() ));

		let sink = Arc::clone( &seen );
		glue.set_listener( 7, Box::new( move | state | sink.lock().unwrap().push( state ))).unwrap();

		glue.notify( 7, InteractionState::PLAY );
		glue.notify( 8, InteractionState::EDIT );
		glue.notify( 7, InteractionState::EDIT );

		assert_eq!( *seen.lock().unwrap(), vec![ InteractionState::PLAY, InteractionState::EDIT ]);
	}

	#[test]
	fn removed_listener_is_not_called() {
		let glue = Glue::unbound();
		let seen = Arc::new( Mutex::new( 0_usize ));

		let sink = Arc::clone( &seen );
		glue.set_listener( 1, Box::new( move | _ | *sink.lock().unwrap() += 1 )).unwrap();
		glue.remove_listener( 1 );
		glue.notify( 1, InteractionState::EDIT );

		assert_eq!( *seen.lock().unwrap(), 0 );
	}

	#[test]
	fn listener_may_reenter_the_registry() {
		let glue = Arc::new( Glue::unbound() );
		let seen = Arc::new( Mutex::new( Vec::new() ));

		let registry = Arc::clone( &glue );
		let sink = Arc::clone( &seen );
		glue.set_listener( 1, Box::new( move | state | {
			let inner = Arc::clone( &sink );
			registry.set_listener( 2, Box::new( move | state | inner.lock().unwrap().push(( 2, state )))).unwrap();
			registry.notify( 2, state );
			sink.lock().unwrap().push(( 1, state ));
		})).unwrap();

		glue.notify( 1, InteractionState::PLAY );
		glue.notify( 1, InteractionState::EDIT );

		assert_eq!( *seen.lock().unwrap(), vec![
			( 2, InteractionState::PLAY ), ( 1, InteractionState::PLAY ),
			( 2, InteractionState::EDIT ), ( 1, InteractionState::EDIT ),
		]);
		glue.remove_listener( 1 );
	}

	#[test]
	fn listener_removed_while_running_stays_removed() {
		let glue = Arc::new( Glue::unbound() );
		let calls = Arc::new( Mutex::new( 0_usize ));

		let registry = Arc::clone( &glue );
		let sink = Arc::clone( &calls );
		glue.set_listener( 3, Box::new( move | _ | {
			*sink.lock().unwrap() += 1 ;
			registry.remove_listener( 3 );
		})).unwrap();

		glue.notify( 3, InteractionState::PLAY );
		glue.notify( 3, InteractionState::EDIT );

		assert_eq!( *calls.lock().unwrap(), 1 );
	}

	#[test]
	fn dispatching_is_visible_only_inside_the_listener() {
		let glue = Arc::new( Glue::unbound() );
		let inside = Arc::new( Mutex::new( None ));

		let registry = Arc::clone( &glue );
		let sink = Arc::clone( &inside );
		glue.set_listener( 4, Box::new( move | _ | *sink.lock().unwrap() = Some( registry.is_dispatching() ))).unwrap();

		assert!( !glue.is_dispatching() );
		glue.notify( 4, InteractionState::PLAY );
		assert_eq!( *inside.lock().unwrap(), Some( true ));
		assert!( !glue.is_dispatching() );
		glue.remove_listener( 4 );
	}

	#[test]
	fn context_ids_are_unique() {
		let glue = Glue::unbound();
		let first = glue.next_context_id();
		let second = glue.next_context_id();
		assert_ne!( first, second );
	}

	#[test]
	fn first_panic_message_is_kept() {
		let glue = Glue::unbound();
		glue.record_panic( "first".to_string() );
		glue.record_panic( "second".to_string() );
		assert_eq!( glue.panic_message(), Some( "first" ));
	}

}
