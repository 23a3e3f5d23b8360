use std::collections::BTreeMap ;
use std::sync::{ Arc, Mutex, MutexGuard };
use std::sync::atomic::{ AtomicU64, AtomicUsize, Ordering };
use async_trait::async_trait ;
use once_cell::sync::Lazy ;
use tokio::sync::Notify ;
use logicx_host::{
	CommandSpec, CompiledModule, ComputeContext, ComputeModule, ContainerId, ContextError, DocumentType,
	Host, HostError, Icon, InteractionState, ModuleLoadError, ModuleLoader, MountTarget,
	SerializedDocument, SettingsTab, StateListener, ToggleButton, VaultPath,
};

static TRACING: Lazy<()> = Lazy::new(|| {
	let _ = tracing_subscriber::fmt()
		.with_env_filter( tracing_subscriber::EnvFilter::from_default_env() )
		.with_test_writer()
		.try_init();
});

pub fn init_tracing() { Lazy::force( &TRACING ); }

/// Lets every task spawned so far run until it blocks.
pub async fn settle() {
	for _ in 0..8 { tokio::task::yield_now().await ; }
}

fn lock<T>( mutex: &Mutex<T> ) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(| poisoned | poisoned.into_inner() )
}

/// How a fake context answers `set_state`.
#[derive( Copy, Clone, Debug, PartialEq, Eq )]
pub enum AckMode {
	/// Applies the state and notifies during the call.
	Immediate,
	/// Queues the state until the test calls `FakeHandle::flush`.
	Deferred,
	/// Accepts the call and does nothing.
	Ignore,
}

#[derive( Default )]
struct ContextRecord {
	data: SerializedDocument,
	state: InteractionState,
	pending: Vec<InteractionState>,
	listener: Option<StateListener>,
	mounted: Vec<ContainerId>,
	calls: Vec<&'static str>,
	fail_next: Option<&'static str>,
	released: bool,
}

impl ContextRecord {
	fn notify( &mut self, state: InteractionState ) {
		self.state = state ;
		if let Some( listener ) = self.listener.as_mut() { listener( state ); }
	}
}

struct ModuleRecord {
	ack: AckMode,
	empty: SerializedDocument,
	initial_state: InteractionState,
	fail_create: bool,
	contexts: Vec<Arc<Mutex<ContextRecord>>>,
}

/// An in-memory compute module. Clones share the same record.
#[derive( Clone )]
pub struct FakeModule( Arc<Mutex<ModuleRecord>> );

impl FakeModule {

	pub fn new( ack: AckMode ) -> Self {
		Self( Arc::new( Mutex::new( ModuleRecord {
			ack,
			empty: SerializedDocument::new( "EMPTY" ),
			initial_state: InteractionState::EDIT,
			fail_create: false,
			contexts: Vec::new(),
		})))
	}

	pub fn failing_create() -> Self {
		let module = Self::new( AckMode::Immediate );
		lock( &module.0 ).fail_create = true ;
		module
	}

	pub fn compiled( &self ) -> CompiledModule { CompiledModule::new( self.clone() ) }

	pub fn context_count( &self ) -> usize { lock( &self.0 ).contexts.len() }

	pub fn context( &self, index: usize ) -> FakeHandle {
		FakeHandle( Arc::clone( &lock( &self.0 ).contexts[ index ]))
	}

	pub fn last_context( &self ) -> FakeHandle {
		let count = self.context_count();
		assert!( count > 0, "No context was created" );
		self.context( count - 1 )
	}

}

impl ComputeModule for FakeModule {
	fn create_context( &self ) -> Result<Box<dyn ComputeContext>, ContextError> {
		let mut module = lock( &self.0 );
		if module.fail_create { return Err( ContextError::Rejected( "constructor failed".to_string() )) }
		let record = Arc::new( Mutex::new( ContextRecord {
			data: module.empty.clone(),
			state: module.initial_state,
			..ContextRecord::default()
		}));
		module.contexts.push( Arc::clone( &record ));
		Ok( Box::new( FakeContext { record, ack: module.ack, empty: module.empty.clone() }))
	}
}

struct FakeContext {
	record: Arc<Mutex<ContextRecord>>,
	ack: AckMode,
	empty: SerializedDocument,
}

impl FakeContext {
	fn live( &self, call: &'static str ) -> Result<MutexGuard<'_, ContextRecord>, ContextError> {
		let mut record = lock( &self.record );
		if record.released { return Err( ContextError::Released ) }
		record.calls.push( call );
		if record.fail_next == Some( call ) {
			record.fail_next = None ;
			return Err( ContextError::Rejected( format!( "{} failed once", call )))
		}
		Ok( record )
	}
}

impl ComputeContext for FakeContext {

	fn get_data( &mut self ) -> Result<SerializedDocument, ContextError> {
		Ok( self.live( "get_data" )?.data.clone() )
	}

	fn set_data( &mut self, data: &SerializedDocument, _clear: bool ) -> Result<(), ContextError> {
		self.live( "set_data" )?.data = data.clone();
		Ok(())
	}

	fn clear( &mut self ) -> Result<(), ContextError> {
		let empty = self.empty.clone();
		self.live( "clear" )?.data = empty ;
		Ok(())
	}

	fn mount( &mut self, container: ContainerId ) -> Result<(), ContextError> {
		self.live( "mount" )?.mounted.push( container );
		Ok(())
	}

	fn get_state( &mut self ) -> Result<InteractionState, ContextError> {
		Ok( self.live( "get_state" )?.state )
	}

	fn set_state( &mut self, state: InteractionState ) -> Result<(), ContextError> {
		let ack = self.ack ;
		let mut record = self.live( "set_state" )?;
		match ack {
			AckMode::Immediate => record.notify( state ),
			AckMode::Deferred => record.pending.push( state ),
			AckMode::Ignore => {},
		}
		Ok(())
	}

	fn on_state_changed( &mut self, listener: StateListener ) -> Result<(), ContextError> {
		self.live( "on_state_changed" )?.listener = Some( listener );
		Ok(())
	}

	fn remove_state_listener( &mut self ) {
		lock( &self.record ).listener = None ;
	}

	fn release( &mut self ) -> Result<(), ContextError> {
		let mut record = self.live( "release" )?;
		record.released = true ;
		record.listener = None ;
		Ok(())
	}

}

/// Test-side view of a fake context.
#[derive( Clone )]
pub struct FakeHandle( Arc<Mutex<ContextRecord>> );

impl FakeHandle {

	pub fn data( &self ) -> SerializedDocument { lock( &self.0 ).data.clone() }
	pub fn state( &self ) -> InteractionState { lock( &self.0 ).state }
	pub fn mounted( &self ) -> Vec<ContainerId> { lock( &self.0 ).mounted.clone() }
	pub fn calls( &self ) -> Vec<&'static str> { lock( &self.0 ).calls.clone() }
	pub fn is_released( &self ) -> bool { lock( &self.0 ).released }
	pub fn has_listener( &self ) -> bool { lock( &self.0 ).listener.is_some() }

	pub fn count( &self, call: &str ) -> usize {
		lock( &self.0 ).calls.iter().filter(| recorded | **recorded == call ).count()
	}

	/// Makes the next `call` on this context fail; later ones succeed again.
	pub fn fail_next( &self, call: &'static str ) { lock( &self.0 ).fail_next = Some( call ); }

	/// Reports `state` as if the module changed it on its own.
	pub fn emit( &self, state: InteractionState ) { lock( &self.0 ).notify( state ); }

	/// Applies every deferred `set_state`, in order.
	pub fn flush( &self ) {
		let mut record = lock( &self.0 );
		let pending = std::mem::take( &mut record.pending );
		pending.into_iter().for_each(| state | record.notify( state ));
	}

}

/// Counts invocations and optionally waits for the test to open the gate.
#[derive( Clone )]
pub struct GatedLoader {
	module: FakeModule,
	fail: bool,
	gated: bool,
	gate: Arc<Notify>,
	calls: Arc<AtomicUsize>,
}

impl GatedLoader {

	pub fn ready( module: FakeModule ) -> Self {
		Self { module, fail: false, gated: false, gate: Arc::new( Notify::new() ), calls: Arc::new( AtomicUsize::new( 0 ))}
	}

	pub fn gated( module: FakeModule ) -> Self { Self { gated: true, ..Self::ready( module )}}

	pub fn failing() -> Self { Self { fail: true, ..Self::ready( FakeModule::new( AckMode::Immediate ))}}

	pub fn open( &self ) { self.gate.notify_one(); }

	pub fn calls( &self ) -> usize { self.calls.load( Ordering::SeqCst ) }

}

#[async_trait]
impl ModuleLoader for GatedLoader {
	async fn load( &self ) -> Result<CompiledModule, ModuleLoadError> {
		self.calls.fetch_add( 1, Ordering::SeqCst );
		if self.gated { self.gate.notified().await; }
		match self.fail {
			true => Err( ModuleLoadError::Task( "loader failed".to_string() )),
			false => Ok( self.module.compiled() ),
		}
	}
}

#[derive( Default )]
pub struct HostRecord {
	pub views: Vec<DocumentType>,
	pub commands: Vec<CommandSpec>,
	pub settings_tabs: Vec<SettingsTab>,
	pub files: BTreeMap<String, SerializedDocument>,
	pub opened: Vec<VaultPath>,
	pub notices: Vec<String>,
	pub children: Vec<( MountTarget, MountTarget )>,
}

/// An in-memory host that records everything the plugin asks of it.
#[derive( Default )]
pub struct RecordingHost {
	record: Mutex<HostRecord>,
	next_container: AtomicU64,
	fail_storage: bool,
	fail_containers: bool,
	fail_registration: bool,
}

impl RecordingHost {

	pub fn new() -> Arc<Self> { Arc::new( Self::default() )}

	pub fn with_failing_storage() -> Arc<Self> { Arc::new( Self { fail_storage: true, ..Self::default() })}

	pub fn with_failing_containers() -> Arc<Self> { Arc::new( Self { fail_containers: true, ..Self::default() })}

	pub fn with_failing_registration() -> Arc<Self> { Arc::new( Self { fail_registration: true, ..Self::default() })}

	pub fn with_files( paths: &[ &str ]) -> Arc<Self> {
		let host = Self::default();
		lock( &host.record ).files.extend( paths.iter().map(| path |
			( VaultPath::new( path ).as_str().to_string(), SerializedDocument::new( "EXISTING" ))
		));
		Arc::new( host )
	}

	pub fn record( &self ) -> MutexGuard<'_, HostRecord> { lock( &self.record ) }

	pub fn file( &self, path: &str ) -> Option<SerializedDocument> {
		lock( &self.record ).files.get( VaultPath::new( path ).as_str() ).cloned()
	}

}

#[async_trait]
impl Host for RecordingHost {

	fn register_view( &self, document_type: &DocumentType ) -> Result<(), HostError> {
		if self.fail_registration { return Err( HostError::Registration( "view type taken".to_string() )) }
		lock( &self.record ).views.push( document_type.clone() );
		Ok(())
	}

	fn register_command( &self, command: &CommandSpec ) -> Result<(), HostError> {
		lock( &self.record ).commands.push( command.clone() );
		Ok(())
	}

	fn register_settings_tab( &self, tab: &SettingsTab ) -> Result<(), HostError> {
		lock( &self.record ).settings_tabs.push( tab.clone() );
		Ok(())
	}

	fn create_child_container( &self, parent: &MountTarget ) -> Result<MountTarget, HostError> {
		if self.fail_containers { return Err( HostError::Container( "no layout".to_string() )) }
		let child = MountTarget::block( ContainerId( 1000 + self.next_container.fetch_add( 1, Ordering::SeqCst )));
		lock( &self.record ).children.push(( *parent, child ));
		Ok( child )
	}

	async fn create_file( &self, path: &VaultPath, data: &SerializedDocument ) -> Result<(), HostError> {
		if self.fail_storage { return Err( HostError::Storage( "disk full".to_string() )) }
		let mut record = lock( &self.record );
		if record.files.contains_key( path.as_str() ) { return Err( HostError::AlreadyExists( path.clone() )) }
		record.files.insert( path.as_str().to_string(), data.clone() );
		Ok(())
	}

	async fn open_in_new_panel( &self, path: &VaultPath ) -> Result<(), HostError> {
		lock( &self.record ).opened.push( path.clone() );
		Ok(())
	}

	fn notice( &self, message: &str ) {
		lock( &self.record ).notices.push( message.to_string() );
	}

}

#[derive( Debug, Default )]
pub struct ButtonRecord {
	pub icon: Option<Icon>,
	pub disabled: bool,
	pub tooltip: String,
	pub icons: Vec<Icon>,
}

/// A toggle button whose every update can be inspected. Clones share the record.
#[derive( Clone, Default )]
pub struct RecordingButton( Arc<Mutex<ButtonRecord>> );

impl RecordingButton {
	pub fn new() -> Self { Self::default() }
	pub fn icon( &self ) -> Option<Icon> { lock( &self.0 ).icon }
	pub fn icons( &self ) -> Vec<Icon> { lock( &self.0 ).icons.clone() }
	pub fn is_disabled( &self ) -> bool { lock( &self.0 ).disabled }
	pub fn tooltip( &self ) -> String { lock( &self.0 ).tooltip.clone() }
}

impl ToggleButton for RecordingButton {
	fn set_icon( &mut self, icon: Icon ) {
		let mut record = lock( &self.0 );
		record.icon = Some( icon );
		record.icons.push( icon );
	}
	fn set_disabled( &mut self, disabled: bool ) { lock( &self.0 ).disabled = disabled ; }
	fn set_tooltip( &mut self, tooltip: &str ) { lock( &self.0 ).tooltip = tooltip.to_string(); }
}
