use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mio::Interest;
use mio::net::TcpListener;

use crate::EventLoop;

#[test]
fn run_returns_immediately_when_idle() {
    let mut event_loop = EventLoop::new().unwrap();
    event_loop.run().unwrap();
}

#[test]
fn deferred_tasks_run_in_order() {
    let mut event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    for index in 0..3 {
        let order = Rc::clone(&order);
        handle.defer(move || order.borrow_mut().push(index));
    }

    event_loop.run().unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn tasks_deferred_from_tasks_run_on_a_later_turn() {
    let mut event_loop = EventLoop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let recorded = Rc::clone(&order);
    event_loop
        .run_with(move |handle| {
            let inner = Rc::clone(&recorded);
            handle.defer(move || inner.borrow_mut().push("second"));
            recorded.borrow_mut().push("first");
        })
        .unwrap();

    assert_eq!(*order.borrow(), vec!["first", "second"]);
}

#[test]
fn stop_halts_remaining_tasks() {
    let mut event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let ran = Rc::new(Cell::new(0));

    let stopper = handle.clone();
    let counter = Rc::clone(&ran);
    handle.defer(move || {
        counter.set(counter.get() + 1);
        stopper.stop();
    });
    let counter = Rc::clone(&ran);
    handle.defer(move || counter.set(counter.get() + 1));

    event_loop.run().unwrap();
    assert_eq!(ran.get(), 1);

    event_loop.run().unwrap();
    assert_eq!(ran.get(), 2);
}

#[test]
fn callback_can_deregister_its_own_source() {
    let mut event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();

    let listener = Rc::new(RefCell::new(
        TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap(),
    ));
    let addr = listener.borrow().local_addr().unwrap();
    let token_slot = Rc::new(Cell::new(None));
    let accepted = Rc::new(Cell::new(false));

    let callback_listener = Rc::clone(&listener);
    let callback_handle = handle.clone();
    let callback_token = Rc::clone(&token_slot);
    let callback_accepted = Rc::clone(&accepted);
    let token = handle
        .register(
            &mut *listener.borrow_mut(),
            Interest::READABLE,
            move |readiness| {
                assert!(readiness.readable);
                let mut listener = callback_listener.borrow_mut();
                if listener.accept().is_ok() {
                    callback_accepted.set(true);
                }
                let token = callback_token.get().unwrap();
                callback_handle.deregister(&mut *listener, token).unwrap();
            },
        )
        .unwrap();
    token_slot.set(Some(token));
    assert_eq!(handle.source_count(), 1);

    let _client = std::net::TcpStream::connect(addr).unwrap();
    event_loop.run().unwrap();

    assert!(accepted.get());
    assert_eq!(handle.source_count(), 0);
}

#[test]
fn deregistering_twice_is_harmless() {
    let event_loop = EventLoop::new().unwrap();
    let handle = event_loop.handle();
    let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let token = handle
        .register(&mut listener, Interest::READABLE, |_| {})
        .unwrap();
    handle.deregister(&mut listener, token).unwrap();
    handle.deregister(&mut listener, token).unwrap();
    assert_eq!(handle.source_count(), 0);
}
