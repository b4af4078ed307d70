//! Command routing decisions.
//!
//! Turns a command into a [`Route`] before any I/O, and decides what to do
//! with each reply of a key-routed command ([`RedirectStep`]). Both the
//! blocking and the event-loop clients drive their dispatch from here.

use crate::cluster::commands::{command_keys, TRANSACTION_CONTROL};
use crate::cluster::errors::Redirect;
use crate::cluster::slot::key_slot;
use crate::core::command::Cmd;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Where a command must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// To the owner of this slot.
    Slot(u16),
    /// To any reachable primary.
    Any,
}

/// Computes the route of a key-routed command.
///
/// # Errors
///
/// - [`Error::CrossSlot`] if its keys hash to different slots
/// - [`Error::InvalidArgument`] for an empty command or a transaction
///   control command, which must be pinned to a node explicitly
pub fn route_for(cmd: &Cmd) -> Result<Route> {
    let name = cmd.name();
    if name.is_empty() {
        return Err(Error::InvalidArgument {
            message: "empty command".to_string(),
        });
    }
    if TRANSACTION_CONTROL.contains(&name.as_str()) {
        return Err(Error::InvalidArgument {
            message: format!("{name} must be sent to an explicit node or through a transaction"),
        });
    }

    let mut slot = None;
    for key in command_keys(cmd) {
        let key_slot = key_slot(key.as_ref());
        match slot {
            None => slot = Some(key_slot),
            Some(s) if s != key_slot => return Err(Error::CrossSlot),
            Some(_) => {}
        }
    }

    Ok(slot.map_or(Route::Any, Route::Slot))
}

/// What to do with a reply to a key-routed command.
#[derive(Debug)]
pub enum RedirectStep {
    /// The reply is final; hand it to the caller.
    Done,
    /// Resend the command as the redirect says.
    Follow(Redirect),
    /// The redirect bound is exhausted.
    GiveUp(Error),
}

/// Classifies `reply` for a command already resent `redirects` times.
///
/// A command is resent at most `max_redirects` times; the relocation
/// signal after that fails with [`Error::TooManyRedirections`].
pub fn next_step(reply: &Frame, redirects: u32, max_redirects: u32) -> RedirectStep {
    let Some(redirect) = Redirect::from_frame(reply) else {
        return RedirectStep::Done;
    };
    if redirects >= max_redirects {
        return RedirectStep::GiveUp(Error::TooManyRedirections {
            last: reply.error_message().unwrap_or_default(),
        });
    }
    RedirectStep::Follow(redirect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::errors::RedirectKind;
    use crate::core::command;

    #[test]
    fn test_route_single_key() {
        assert_eq!(route_for(&command::get("foo")).unwrap(), Route::Slot(12182));
    }

    #[test]
    fn test_route_keyless() {
        assert_eq!(route_for(&command::ping()).unwrap(), Route::Any);
        assert_eq!(route_for(&command::dbsize()).unwrap(), Route::Any);
    }

    #[test]
    fn test_route_same_slot_multi_key() {
        let cmd = command::mget(["{user1}.a", "{user1}.b"]);
        assert_eq!(
            route_for(&cmd).unwrap(),
            Route::Slot(key_slot("user1"))
        );
    }

    #[test]
    fn test_route_cross_slot() {
        let err = route_for(&command::mget(["foo", "bar"])).unwrap_err();
        assert!(matches!(err, Error::CrossSlot));
        let err = route_for(&command::mset([("foo", "1"), ("bar", "2")])).unwrap_err();
        assert!(matches!(err, Error::CrossSlot));
    }

    #[test]
    fn test_route_rejects_transaction_control() {
        for cmd in [command::multi(), command::exec(), command::discard()] {
            assert!(matches!(
                route_for(&cmd),
                Err(Error::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn test_next_step_plain_reply() {
        assert!(matches!(
            next_step(&Frame::SimpleString(b"OK".to_vec()), 0, 5),
            RedirectStep::Done
        ));
        assert!(matches!(
            next_step(&Frame::Error(b"ERR wrong type".to_vec()), 0, 5),
            RedirectStep::Done
        ));
    }

    #[test]
    fn test_next_step_follow_then_give_up() {
        let moved = Frame::Error(b"MOVED 12182 127.0.0.1:7001".to_vec());
        match next_step(&moved, 0, 1) {
            RedirectStep::Follow(r) => assert_eq!(r.kind, RedirectKind::Moved),
            other => panic!("expected Follow, got {other:?}"),
        }
        match next_step(&moved, 1, 1) {
            RedirectStep::GiveUp(Error::TooManyRedirections { last }) => {
                assert_eq!(last, "MOVED 12182 127.0.0.1:7001");
            }
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[test]
    fn test_next_step_zero_bound() {
        let ask = Frame::Error(b"ASK 1 127.0.0.1:7001".to_vec());
        assert!(matches!(next_step(&ask, 0, 0), RedirectStep::GiveUp(_)));
    }
}
