//! Event kinds and the capability sets handlers declare.

use std::fmt;

use bitflags::bitflags;

/// Every event kind a pipeline can route.
///
/// The first six travel inbound (head to tail); the rest are outbound requests
/// travelling from the tail towards the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChannelOpen,
    ChannelActive,
    ChannelInactive,
    ExceptionCaught,
    UserEventTriggered,
    MessageUpdated,
    Bind,
    Connect,
    Disconnect,
    Close,
    Flush,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::ChannelOpen,
        EventKind::ChannelActive,
        EventKind::ChannelInactive,
        EventKind::ExceptionCaught,
        EventKind::UserEventTriggered,
        EventKind::MessageUpdated,
        EventKind::Bind,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Close,
        EventKind::Flush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChannelOpen => "channel_open",
            EventKind::ChannelActive => "channel_active",
            EventKind::ChannelInactive => "channel_inactive",
            EventKind::ExceptionCaught => "exception_caught",
            EventKind::UserEventTriggered => "user_event_triggered",
            EventKind::MessageUpdated => "message_updated",
            EventKind::Bind => "bind",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Close => "close",
            EventKind::Flush => "flush",
        }
    }

    pub fn is_inbound(&self) -> bool {
        EventSet::INBOUND.contains(self.as_set())
    }

    pub fn as_set(&self) -> EventSet {
        match self {
            EventKind::ChannelOpen => EventSet::CHANNEL_OPEN,
            EventKind::ChannelActive => EventSet::CHANNEL_ACTIVE,
            EventKind::ChannelInactive => EventSet::CHANNEL_INACTIVE,
            EventKind::ExceptionCaught => EventSet::EXCEPTION_CAUGHT,
            EventKind::UserEventTriggered => EventSet::USER_EVENT_TRIGGERED,
            EventKind::MessageUpdated => EventSet::MESSAGE_UPDATED,
            EventKind::Bind => EventSet::BIND,
            EventKind::Connect => EventSet::CONNECT,
            EventKind::Disconnect => EventSet::DISCONNECT,
            EventKind::Close => EventSet::CLOSE,
            EventKind::Flush => EventSet::FLUSH,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// The set of event kinds a [`ChannelHandler`](crate::ChannelHandler) implements.
    ///
    /// A context only receives the kinds in its handler's set; everything else
    /// skips straight past it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventSet: u16 {
        const CHANNEL_OPEN = 1 << 0;
        const CHANNEL_ACTIVE = 1 << 1;
        const CHANNEL_INACTIVE = 1 << 2;
        const EXCEPTION_CAUGHT = 1 << 3;
        const USER_EVENT_TRIGGERED = 1 << 4;
        const MESSAGE_UPDATED = 1 << 5;
        const BIND = 1 << 6;
        const CONNECT = 1 << 7;
        const DISCONNECT = 1 << 8;
        const CLOSE = 1 << 9;
        const FLUSH = 1 << 10;

        const INBOUND = Self::CHANNEL_OPEN.bits()
            | Self::CHANNEL_ACTIVE.bits()
            | Self::CHANNEL_INACTIVE.bits()
            | Self::EXCEPTION_CAUGHT.bits()
            | Self::USER_EVENT_TRIGGERED.bits()
            | Self::MESSAGE_UPDATED.bits();
        const OUTBOUND = Self::BIND.bits()
            | Self::CONNECT.bits()
            | Self::DISCONNECT.bits()
            | Self::CLOSE.bits()
            | Self::FLUSH.bits();
    }
}

impl EventSet {
    /// True if any inbound kind is present.
    pub fn is_inbound(&self) -> bool {
        self.intersects(EventSet::INBOUND)
    }

    /// True if any outbound kind is present.
    pub fn is_outbound(&self) -> bool {
        self.intersects(EventSet::OUTBOUND)
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.contains(kind.as_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions_partition_all_kinds() {
        for kind in EventKind::ALL {
            let set = kind.as_set();
            assert_ne!(
                EventSet::INBOUND.contains(set),
                EventSet::OUTBOUND.contains(set),
                "{kind}"
            );
        }
        assert_eq!(EventSet::INBOUND | EventSet::OUTBOUND, EventSet::all());
    }

    #[test]
    fn test_capabilities() {
        let set = EventSet::MESSAGE_UPDATED | EventSet::FLUSH;
        assert!(set.is_inbound());
        assert!(set.is_outbound());
        assert!(set.handles(EventKind::Flush));
        assert!(!set.handles(EventKind::Close));
        assert!(!EventSet::empty().is_inbound());
    }
}
