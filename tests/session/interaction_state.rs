use std::sync::{ Arc, Mutex };
use logicx_host::{ InteractionState, SerializedDocument, Session, SessionError };
use crate::fakes::{ AckMode, FakeModule };

fn observe( session: &mut Session ) -> Arc<Mutex<Vec<InteractionState>>> {
	let seen = Arc::new( Mutex::new( Vec::new() ));
	let sink = Arc::clone( &seen );
	session.on_state_changed( move | state | sink.lock().expect( "observer poisoned" ).push( state ))
		.expect( "Failed to register observer" );
	seen
}

#[test]
fn toggle_once_flips_and_twice_restores() {

	let module = FakeModule::new( AckMode::Immediate );
	let mut session = Session::open( &module.compiled(), None ).expect( "Failed to open session" );

	session.toggle_edit().expect( "Failed to toggle" );
	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::PLAY );

	session.toggle_edit().expect( "Failed to toggle" );
	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::EDIT );
	assert_eq!( module.last_context().state(), InteractionState::EDIT );

}

#[test]
fn toggling_keeps_the_document() {

	let module = FakeModule::new( AckMode::Immediate );
	let document = SerializedDocument::new( "A=1;B=0;OUT=A&B" );
	let mut session = Session::open( &module.compiled(), Some( &document )).expect( "Failed to open session" );

	session.toggle_edit().expect( "Failed to toggle" );
	session.toggle_edit().expect( "Failed to toggle" );

	assert_eq!( session.get_data().expect( "Failed to get data" ), document );

}

#[test]
fn observer_sees_every_state_in_order() {

	let module = FakeModule::new( AckMode::Immediate );
	let mut session = Session::open( &module.compiled(), None ).expect( "Failed to open session" );
	let seen = observe( &mut session );
	let context = module.last_context();

	context.emit( InteractionState::PLAY );
	context.emit( InteractionState::EDIT );
	context.emit( InteractionState::PLAY );
	context.emit( InteractionState::PLAY );

	assert_eq!( *seen.lock().expect( "observer poisoned" ), vec![
		InteractionState::PLAY,
		InteractionState::EDIT,
		InteractionState::PLAY,
		InteractionState::PLAY,
	]);
	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::PLAY );

}

#[test]
fn mirror_waits_for_a_deferred_acknowledgement() {

	let module = FakeModule::new( AckMode::Deferred );
	let mut session = Session::open( &module.compiled(), None ).expect( "Failed to open session" );
	let seen = observe( &mut session );

	session.toggle_edit().expect( "Failed to toggle" );
	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::EDIT );
	assert!( seen.lock().expect( "observer poisoned" ).is_empty() );

	module.last_context().flush();
	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::PLAY );
	assert_eq!( *seen.lock().expect( "observer poisoned" ), vec![ InteractionState::PLAY ]);

}

#[test]
fn ignored_request_leaves_the_mirror_alone() {

	let module = FakeModule::new( AckMode::Ignore );
	let mut session = Session::open( &module.compiled(), None ).expect( "Failed to open session" );

	session.toggle_edit().expect( "Failed to toggle" );

	assert_eq!( session.interaction_state().expect( "Failed to read state" ), InteractionState::EDIT );
	assert_eq!( module.last_context().count( "set_state" ), 1 );

}

#[test]
fn second_observer_is_rejected() {

	let module = FakeModule::new( AckMode::Immediate );
	let mut session = Session::open( &module.compiled(), None ).expect( "Failed to open session" );
	let _seen = observe( &mut session );

	match session.on_state_changed(| _ | {}) {
		Err( SessionError::ObserverAlreadyRegistered ) => {},
		value => panic!( "Expected Err( ObserverAlreadyRegistered ), found: {:#?}", value ),
	}

}

#[test]
fn sessions_on_one_module_do_not_share_state() {

	let module = FakeModule::new( AckMode::Immediate );
	let compiled = module.compiled();
	let mut first = Session::open( &compiled, None ).expect( "Failed to open session" );
	let second = Session::open( &compiled, None ).expect( "Failed to open session" );

	first.toggle_edit().expect( "Failed to toggle" );

	assert_eq!( first.interaction_state().expect( "Failed to read state" ), InteractionState::PLAY );
	assert_eq!( second.interaction_state().expect( "Failed to read state" ), InteractionState::EDIT );

}
