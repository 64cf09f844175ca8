use std::fmt::{self, Write as _};
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

pub const TENANT_COUNT: usize = 100;
const EXTENSIONS: RangeInclusive<u16> = 1000..=9999;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// Rough size of a rendered event line, used to presize batch buffers.
pub const EVENT_SIZE_HINT: usize = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Trying,
    Ringing,
    Confirmed,
    Terminated,
}

impl CallState {
    pub const ALL: [Self; 4] = [
        Self::Trying,
        Self::Ringing,
        Self::Confirmed,
        Self::Terminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trying => "trying",
            Self::Ringing => "ringing",
            Self::Confirmed => "confirmed",
            Self::Terminated => "terminated",
        }
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness marker. The timestamp is the literal `now`, consumers only look
/// at the tag.
pub struct Heartbeat;

impl Heartbeat {
    pub const LINE: &'static [u8] = b"<Heartbeat><Timestamp>now</Timestamp></Heartbeat>\n";
}

/// One synthetic call state change. Borrows its tenants from the
/// [`EventFactory`] that built it and lives only as long as it takes to
/// render it.
#[derive(Debug, Clone)]
pub struct CallStateEvent<'a> {
    pub call_id: u64,
    pub caller_ext: u16,
    pub callee_ext: u16,
    pub uri_tenant: &'a str,
    pub state: CallState,
    pub tenant_id: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl CallStateEvent<'_> {
    pub const DIRECTION: &'static str = "inbound";

    pub fn caller_uri(&self) -> SipUri<'_> {
        SipUri {
            extension: self.caller_ext,
            domain: self.uri_tenant,
        }
    }

    pub fn callee_uri(&self) -> SipUri<'_> {
        SipUri {
            extension: self.callee_ext,
            domain: self.uri_tenant,
        }
    }

    /// Appends the XML line, newline included.
    pub fn render(&self, buffer: &mut String) {
        // Writing into a String cannot fail.
        let _ = writeln!(buffer, "{}", self);
    }
}

impl fmt::Display for CallStateEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CallStateEvent>\
             <CallId>call-{}</CallId>\
             <CallerUri>{}</CallerUri>\
             <CalleeUri>{}</CalleeUri>\
             <State>{}</State>\
             <Direction>{}</Direction>\
             <TenantId>{}</TenantId>\
             <Timestamp>{}</Timestamp>\
             </CallStateEvent>",
            self.call_id,
            self.caller_uri(),
            self.callee_uri(),
            self.state,
            Self::DIRECTION,
            self.tenant_id,
            self.timestamp.format(TIMESTAMP_FORMAT),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipUri<'a> {
    pub extension: u16,
    pub domain: &'a str,
}

impl fmt::Display for SipUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sip:{}@{}", self.extension, self.domain)
    }
}

/// Builds events from the fixed table of synthetic tenant domains. Cheap to
/// clone, every connection handler gets its own copy.
#[derive(Debug, Clone)]
pub struct EventFactory {
    tenants: Arc<[String]>,
    consistent_tenants: bool,
}

impl EventFactory {
    pub fn new(consistent_tenants: bool) -> Self {
        let tenants = (0..TENANT_COUNT)
            .map(|i| format!("tenant-{}.com", i))
            .collect();
        Self {
            tenants,
            consistent_tenants,
        }
    }

    fn random_tenant<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.tenants[rng.random_range(0..self.tenants.len())]
    }

    pub fn event<R: Rng + ?Sized>(&self, call_id: u64, rng: &mut R) -> CallStateEvent<'_> {
        let uri_tenant = self.random_tenant(rng);
        let caller_ext = rng.random_range(EXTENSIONS);
        let callee_ext = rng.random_range(EXTENSIONS);
        let state = CallState::random(rng);
        let tenant_id = if self.consistent_tenants {
            uri_tenant
        } else {
            self.random_tenant(rng)
        };
        CallStateEvent {
            call_id,
            caller_ext,
            callee_ext,
            uri_tenant,
            state,
            tenant_id,
            timestamp: Utc::now(),
        }
    }

    /// Renders `count` events into `buffer`, numbering them after
    /// `call_counter` and advancing it.
    pub fn render_batch<R: Rng + ?Sized>(
        &self,
        buffer: &mut String,
        call_counter: &mut u64,
        count: u64,
        rng: &mut R,
    ) {
        for _ in 0..count {
            *call_counter += 1;
            self.event(*call_counter, rng).render(buffer);
        }
    }
}
