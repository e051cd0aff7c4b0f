//! S6 — a memo that raises recovers once its source stops producing an
//! error, and the error channel only fires observers on an actual
//! true/false transition, not on every rerun.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use fine_reactive::{create_effect, create_memo_try, create_root, create_signal, flush_sync, ComputeResult, ReactiveError};

#[derive(Debug)]
struct BoomError;

impl fmt::Display for BoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom")
    }
}

impl std::error::Error for BoomError {}

#[test]
fn memo_error_latches_and_clears_on_recovery() {
    let (transitions, owner) = create_root(|| {
        let (s, set_s) = create_signal(1);
        let m = create_memo_try(move |_| {
            if s.read() == 1 {
                ComputeResult::Err(Rc::new(BoomError))
            } else {
                ComputeResult::Ready(2)
            }
        });

        match m.try_read() {
            Err(ReactiveError::Compute(e)) => assert!(e.downcast_ref::<BoomError>().is_some()),
            other => panic!("expected a latched compute error, got {other:?}"),
        }

        let transitions = Rc::new(RefCell::new(Vec::new()));
        {
            let transitions = Rc::clone(&transitions);
            create_effect(move |_: Option<&()>| {
                transitions.borrow_mut().push(m.error());
            });
        }
        assert_eq!(*transitions.borrow(), vec![true]);

        set_s.write(2);
        flush_sync();
        assert_eq!(m.read(), 2);
        assert_eq!(*transitions.borrow(), vec![true, false]);

        // Writing the same value again causes no transition and no rerun.
        set_s.write(2);
        flush_sync();
        assert_eq!(*transitions.borrow(), vec![true, false]);

        transitions
    });
    owner.dispose();
    assert_eq!(*transitions.borrow(), vec![true, false]);
}

#[test]
fn reading_a_disposed_cell_is_an_error_not_a_panic() {
    let (cell, owner) = create_root(|| create_signal(1).0);
    owner.dispose();
    assert!(matches!(cell.try_read(), Err(ReactiveError::Disposed)));
}
