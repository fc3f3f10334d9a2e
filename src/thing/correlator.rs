//! Matching platform replies to the request waiting for them.

use super::Error;
use super::onejson::{self, Reply};
use core::fmt::Write as _;
use heapless::String;

/// Request ids start above this value.
pub const FIRST_REQUEST_ID: u32 = 0xFFF0;
/// Request id that is never issued; the counter restarts instead.
pub const REQUEST_ID_LIMIT: u32 = 0x7FFF_FFFF;

/// Where the single outstanding request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyStatus {
    /// No request is waiting.
    Idle,
    /// A request was sent and its reply has not been seen.
    Waiting,
    /// A reply (or the reason it could not be kept) arrived and has not been
    /// collected yet.
    Received,
}

/// One request slot: the id being waited for and the last reply seen.
#[derive(Debug, Clone)]
pub struct Correlator {
    last_id: u32,
    status: ReplyStatus,
    expected: String<{ onejson::MAX_ID_LEN }>,
    as_raw: bool,
    reply: Option<Result<Reply, Error>>,
}

impl Correlator {
    /// An idle correlator.
    pub const fn new() -> Self {
        Self {
            last_id: FIRST_REQUEST_ID,
            status: ReplyStatus::Idle,
            expected: String::new(),
            as_raw: false,
            reply: None,
        }
    }

    /// Allocate the next request id.
    pub fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        if self.last_id == REQUEST_ID_LIMIT {
            self.last_id = FIRST_REQUEST_ID;
        }
        self.last_id
    }

    /// Current status.
    pub fn status(&self) -> ReplyStatus {
        self.status
    }

    /// Start waiting for the reply to `id`.
    pub(crate) fn begin(&mut self, id: u32, as_raw: bool) {
        self.expected.clear();
        // A u32 always fits in MAX_ID_LEN digits.
        let _ = write!(self.expected, "{}", id);
        self.as_raw = as_raw;
        self.reply = None;
        self.status = ReplyStatus::Waiting;
    }

    /// Offer a reply payload. Ignored unless a request is waiting.
    pub(crate) fn complete(&mut self, payload: &str) {
        if self.status != ReplyStatus::Waiting {
            debug!("reply with nobody waiting");
            return;
        }
        match onejson::parse_reply(payload, self.as_raw) {
            Ok(reply) => {
                self.reply = Some(Ok(reply));
                self.status = ReplyStatus::Received;
            }
            // The reply is ours but its data does not fit: fail the request now.
            Err(Error::BufferOverflow) if self.is_expected(payload) => {
                warn!("reply {} does not fit", self.expected.as_str());
                self.reply = Some(Err(Error::BufferOverflow));
                self.status = ReplyStatus::Received;
            }
            Err(e) => warn!("undecodable reply: {:?}", e),
        }
    }

    fn is_expected(&self, payload: &str) -> bool {
        onejson::parse_request(payload).is_ok_and(|envelope| envelope.id == self.expected.as_str())
    }

    /// Collect the reply for the waiting request.
    ///
    /// A received reply for another id is dropped and waiting resumes. A reply
    /// that could not be kept ends the request with its error.
    pub(crate) fn take_matching(&mut self) -> Option<Result<Reply, Error>> {
        if self.status != ReplyStatus::Received {
            return None;
        }
        match self.reply.take() {
            Some(Err(e)) => {
                self.status = ReplyStatus::Idle;
                Some(Err(e))
            }
            Some(Ok(reply)) if reply.id == self.expected => {
                self.status = ReplyStatus::Idle;
                Some(Ok(reply))
            }
            Some(Ok(reply)) => {
                debug!("reply id {} while waiting for {}", reply.id.as_str(), self.expected.as_str());
                self.status = ReplyStatus::Waiting;
                None
            }
            None => {
                self.status = ReplyStatus::Waiting;
                None
            }
        }
    }

    /// Give up on the waiting request.
    pub(crate) fn cancel(&mut self) {
        self.status = ReplyStatus::Idle;
        self.reply = None;
        self.as_raw = false;
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_in_the_reserved_range() {
        let mut correlator = Correlator::new();
        assert_eq!(correlator.next_id(), 65521);
        assert_eq!(correlator.next_id(), 65522);
    }

    #[test]
    fn ids_restart_before_the_limit() {
        let mut correlator = Correlator::new();
        correlator.last_id = REQUEST_ID_LIMIT - 2;
        assert_eq!(correlator.next_id(), REQUEST_ID_LIMIT - 1);
        assert_eq!(correlator.next_id(), FIRST_REQUEST_ID);
        assert_eq!(correlator.next_id(), FIRST_REQUEST_ID + 1);
    }

    #[test]
    fn matching_reply_is_collected_once() {
        let mut correlator = Correlator::new();
        let id = correlator.next_id();
        correlator.begin(id, false);
        correlator.complete(r#"{"id":"65521","code":200,"data":{}}"#);
        assert_eq!(correlator.status(), ReplyStatus::Received);

        let reply = correlator.take_matching().unwrap().unwrap();
        assert_eq!(reply.code, 200);
        assert_eq!(correlator.status(), ReplyStatus::Idle);
        assert!(correlator.take_matching().is_none());
    }

    #[test]
    fn mismatched_reply_resumes_waiting() {
        let mut correlator = Correlator::new();
        correlator.begin(70000, false);
        correlator.complete(r#"{"id":"69999","code":200}"#);
        assert!(correlator.take_matching().is_none());
        assert_eq!(correlator.status(), ReplyStatus::Waiting);
    }

    #[test]
    fn replies_without_a_waiting_request_are_ignored() {
        let mut correlator = Correlator::new();
        correlator.complete(r#"{"id":"1","code":200}"#);
        assert_eq!(correlator.status(), ReplyStatus::Idle);
        assert!(correlator.take_matching().is_none());
    }

    #[test]
    fn oversized_reply_to_the_waiting_request_fails_it() {
        let mut correlator = Correlator::new();
        correlator.begin(65521, false);
        let data = "x".repeat(600);
        correlator.complete(&format!(r#"{{"id":"65520","code":200,"data":"{data}"}}"#));
        assert_eq!(correlator.status(), ReplyStatus::Waiting);

        correlator.complete(&format!(r#"{{"id":"65521","code":200,"data":"{data}"}}"#));
        assert_eq!(correlator.take_matching(), Some(Err(Error::BufferOverflow)));
        assert_eq!(correlator.status(), ReplyStatus::Idle);
    }

    #[test]
    fn undecodable_reply_keeps_waiting() {
        let mut correlator = Correlator::new();
        correlator.begin(1, false);
        correlator.complete("not json");
        assert_eq!(correlator.status(), ReplyStatus::Waiting);
    }
}
