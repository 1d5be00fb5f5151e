use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use outdial_infra_common::{Tick, TickerHandle};
use tracing::debug;

use super::types::{
    CallPhase, ScriptLine, SessionId, SessionResult, SessionSnapshot, Speaker, TickEffect,
    TranscriptEntry,
};
use crate::error::{CallEngineError, Result};
use crate::outcome::CallOutcome;
use crate::queue::{CallId, QueuedCall};

/// State machine for a single dial attempt
///
/// `idle → dialing → connected → ended`, with mute and hold as flags that only
/// exist while connected. Elapsed time and scripted transcript lines advance on
/// ticks, and only while connected and not holding.
#[derive(Debug)]
pub struct CallSession {
    id: SessionId,
    call_id: CallId,
    lead_name: String,
    phone: String,

    /// Stored phase; never `Holding`
    phase: CallPhase,
    is_muted: bool,
    is_holding: bool,

    dialed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,

    elapsed_seconds: u64,
    ring_ticks: u32,
    last_tick_seq: u64,

    transcript: Vec<TranscriptEntry>,
    script: VecDeque<ScriptLine>,

    ticker: Option<TickerHandle>,
}

impl CallSession {
    /// Create an idle session for a queued call
    pub fn new(call: &QueuedCall) -> Self {
        Self {
            id: SessionId::new(),
            call_id: call.id.clone(),
            lead_name: call.lead_name.clone(),
            phone: call.phone_number.clone(),
            phase: CallPhase::Idle,
            is_muted: false,
            is_holding: false,
            dialed_at: None,
            started_at: None,
            ended_at: None,
            elapsed_seconds: 0,
            ring_ticks: 0,
            last_tick_seq: 0,
            transcript: Vec::new(),
            script: VecDeque::new(),
            ticker: None,
        }
    }

    /// Lines to emit as connected time passes
    pub fn with_script(mut self, lines: Vec<ScriptLine>) -> Self {
        self.set_script(lines);
        self
    }

    /// Replace the lines still to be emitted
    pub fn set_script(&mut self, mut lines: Vec<ScriptLine>) {
        lines.sort_by_key(|line| line.at_second);
        self.script = lines.into();
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Reported phase (`Holding` for a connected session on hold)
    pub fn phase(&self) -> CallPhase {
        match self.phase {
            CallPhase::Connected if self.is_holding => CallPhase::Holding,
            phase => phase,
        }
    }

    /// Dialing or connected, i.e. occupying a line
    pub fn is_active(&self) -> bool {
        matches!(self.phase, CallPhase::Dialing | CallPhase::Connected)
    }

    pub fn is_ended(&self) -> bool {
        self.phase == CallPhase::Ended
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_holding(&self) -> bool {
        self.is_holding
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn ring_ticks(&self) -> u32 {
        self.ring_ticks
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Keep the tick subscription alive for as long as the session runs.
    /// An ended session drops the handle straight away.
    pub fn attach_ticker(&mut self, handle: TickerHandle) {
        if self.is_ended() {
            drop(handle);
        } else {
            self.ticker = Some(handle);
        }
    }

    pub fn has_ticker(&self) -> bool {
        self.ticker.is_some()
    }

    /// idle → dialing
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.phase != CallPhase::Idle {
            return Err(CallEngineError::invalid_transition(&self.id, self.phase(), "start"));
        }
        self.phase = CallPhase::Dialing;
        self.dialed_at = Some(now);
        debug!(session_id = %self.id, call_id = %self.call_id, "session idle -> dialing");
        Ok(())
    }

    /// dialing → connected, once the far end answers
    pub fn connect(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.phase != CallPhase::Dialing {
            return Err(CallEngineError::invalid_transition(&self.id, self.phase(), "connect"));
        }
        self.phase = CallPhase::Connected;
        self.started_at = Some(now);
        debug!(session_id = %self.id, ring_ticks = self.ring_ticks, "session dialing -> connected");
        Ok(())
    }

    /// Apply one tick.
    ///
    /// Ticks at or below the last seen sequence number are ignored, so a
    /// duplicated or reordered delivery can never accrue time twice.
    pub fn on_tick(&mut self, tick: Tick) -> Result<TickEffect> {
        self.ensure_open()?;
        if tick.seq <= self.last_tick_seq {
            debug!(session_id = %self.id, seq = tick.seq, last = self.last_tick_seq, "stale tick ignored");
            return Ok(TickEffect::Ignored);
        }
        self.last_tick_seq = tick.seq;

        match self.phase {
            CallPhase::Dialing => {
                self.ring_ticks += 1;
                Ok(TickEffect::Ringing {
                    ring_ticks: self.ring_ticks,
                })
            }
            CallPhase::Connected if self.is_holding => Ok(TickEffect::Paused),
            CallPhase::Connected => {
                self.elapsed_seconds += 1;
                let emitted = self.emit_due_script(tick.at);
                Ok(TickEffect::Accrued {
                    delta_seconds: 1,
                    elapsed_seconds: self.elapsed_seconds,
                    emitted,
                })
            }
            _ => Ok(TickEffect::Ignored),
        }
    }

    /// Append a transcript line; connected and not holding only
    pub fn append_transcript(
        &mut self,
        speaker: Speaker,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TranscriptEntry> {
        self.ensure_open()?;
        if self.phase != CallPhase::Connected || self.is_holding {
            return Err(CallEngineError::invalid_transition(
                &self.id,
                self.phase(),
                "append transcript",
            ));
        }
        Ok(self.push_entry(speaker, text.into(), now))
    }

    /// Flip the mute flag, returning the new value
    pub fn toggle_mute(&mut self) -> Result<bool> {
        self.ensure_connected("toggle mute")?;
        self.is_muted = !self.is_muted;
        debug!(session_id = %self.id, muted = self.is_muted, "mute toggled");
        Ok(self.is_muted)
    }

    /// Flip the hold flag, returning the new value
    pub fn toggle_hold(&mut self) -> Result<bool> {
        self.ensure_connected("toggle hold")?;
        self.is_holding = !self.is_holding;
        debug!(session_id = %self.id, holding = self.is_holding, "hold toggled");
        Ok(self.is_holding)
    }

    /// Terminate the session.
    ///
    /// The first call from dialing or connected returns the result and cancels
    /// the tick subscription before returning. Later calls are no-ops and
    /// return `Ok(None)`.
    pub fn end(
        &mut self,
        outcome: CallOutcome,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionResult>> {
        match self.phase {
            CallPhase::Ended => return Ok(None),
            CallPhase::Idle => {
                return Err(CallEngineError::invalid_transition(&self.id, self.phase, "end"))
            }
            _ => {}
        }

        if let Some(handle) = self.ticker.take() {
            handle.cancel();
        }

        let from = self.phase();
        self.phase = CallPhase::Ended;
        self.is_holding = false;
        self.ended_at = Some(now);
        self.script.clear();
        debug!(session_id = %self.id, %from, outcome = %outcome, "session -> ended");

        Ok(Some(SessionResult {
            session_id: self.id.clone(),
            call_id: self.call_id.clone(),
            lead_name: self.lead_name.clone(),
            phone: self.phone.clone(),
            dialed_at: self.dialed_at.unwrap_or(now),
            started_at: self.started_at,
            ended_at: now,
            duration_seconds: self.elapsed_seconds,
            outcome,
            notes,
        }))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            call_id: self.call_id.clone(),
            lead_name: self.lead_name.clone(),
            phone: self.phone.clone(),
            phase: self.phase(),
            elapsed_seconds: self.elapsed_seconds,
            transcript: self.transcript.clone(),
            is_muted: self.is_muted,
            is_holding: self.is_holding,
            started_at: self.started_at,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_ended() {
            return Err(CallEngineError::session_closed(&self.id));
        }
        Ok(())
    }

    fn ensure_connected(&self, action: &'static str) -> Result<()> {
        self.ensure_open()?;
        if self.phase != CallPhase::Connected {
            return Err(CallEngineError::invalid_transition(&self.id, self.phase(), action));
        }
        Ok(())
    }

    fn emit_due_script(&mut self, now: DateTime<Utc>) -> Vec<TranscriptEntry> {
        let mut emitted = Vec::new();
        while self
            .script
            .front()
            .is_some_and(|line| line.at_second <= self.elapsed_seconds)
        {
            if let Some(line) = self.script.pop_front() {
                emitted.push(self.push_entry(line.speaker, line.text, now));
            }
        }
        emitted
    }

    fn push_entry(&mut self, speaker: Speaker, text: String, now: DateTime<Utc>) -> TranscriptEntry {
        // emitted_at never goes backwards even if the caller's clock does
        let emitted_at = self
            .transcript
            .last()
            .map_or(now, |last| last.emitted_at.max(now));
        let entry = TranscriptEntry {
            seq: self.transcript.len() as u64 + 1,
            speaker,
            text,
            emitted_at,
        };
        self.transcript.push(entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Disposition, FailureReason};
    use crate::queue::{Lead, Priority};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            at: t0() + Duration::seconds(seq as i64),
        }
    }

    fn session() -> CallSession {
        let call = QueuedCall::new(Lead::new("Ada Lovelace", "+1 555 0100", Priority::High), t0(), 1);
        CallSession::new(&call)
    }

    fn connected_session() -> CallSession {
        let mut s = session();
        s.start(t0()).unwrap();
        s.connect(t0()).unwrap();
        s
    }

    #[test]
    fn test_start_only_from_idle() {
        let mut s = session();
        s.start(t0()).unwrap();
        assert_eq!(s.phase(), CallPhase::Dialing);

        let err = s.start(t0()).unwrap_err();
        assert!(matches!(
            err,
            CallEngineError::InvalidTransition { from: CallPhase::Dialing, action: "start", .. }
        ));
    }

    #[test]
    fn test_ticks_while_dialing_only_ring() {
        let mut s = session();
        s.start(t0()).unwrap();
        assert_eq!(s.on_tick(tick(1)).unwrap(), TickEffect::Ringing { ring_ticks: 1 });
        assert_eq!(s.on_tick(tick(2)).unwrap(), TickEffect::Ringing { ring_ticks: 2 });
        assert_eq!(s.elapsed_seconds(), 0);
    }

    #[test]
    fn test_connected_ticks_accrue() {
        let mut s = connected_session();
        for seq in 1..=5 {
            s.on_tick(tick(seq)).unwrap();
        }
        assert_eq!(s.elapsed_seconds(), 5);
    }

    #[test]
    fn test_duplicate_and_reordered_ticks_ignored() {
        let mut s = connected_session();
        s.on_tick(tick(1)).unwrap();
        s.on_tick(tick(2)).unwrap();
        assert_eq!(s.on_tick(tick(2)).unwrap(), TickEffect::Ignored);
        assert_eq!(s.on_tick(tick(1)).unwrap(), TickEffect::Ignored);
        assert_eq!(s.elapsed_seconds(), 2);
    }

    #[test]
    fn test_hold_pauses_accrual_and_transcript() {
        let mut s = connected_session().with_script(vec![ScriptLine::new(3, Speaker::Agent, "Hi there")]);
        s.on_tick(tick(1)).unwrap();
        s.toggle_hold().unwrap();
        assert_eq!(s.phase(), CallPhase::Holding);

        for seq in 2..=31 {
            assert_eq!(s.on_tick(tick(seq)).unwrap(), TickEffect::Paused);
        }
        assert_eq!(s.elapsed_seconds(), 1);
        assert!(s.transcript().is_empty());
        assert!(s.append_transcript(Speaker::Supervisor, "psst", t0()).is_err());

        s.toggle_hold().unwrap();
        s.on_tick(tick(32)).unwrap();
        s.on_tick(tick(33)).unwrap();
        assert_eq!(s.elapsed_seconds(), 3);
        assert_eq!(s.transcript().len(), 1);
        assert_eq!(s.transcript()[0].text, "Hi there");
    }

    #[test]
    fn test_script_lines_emitted_in_order() {
        let mut s = connected_session().with_script(vec![
            ScriptLine::new(2, Speaker::Lead, "Who is this?"),
            ScriptLine::new(1, Speaker::Agent, "Hello!"),
        ]);
        s.on_tick(tick(1)).unwrap();
        match s.on_tick(tick(2)).unwrap() {
            TickEffect::Accrued { emitted, .. } => assert_eq!(emitted[0].speaker, Speaker::Lead),
            other => panic!("unexpected effect {:?}", other),
        }
        let texts: Vec<_> = s.transcript().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello!", "Who is this?"]);
        assert_eq!(s.transcript()[1].seq, 2);
    }

    #[test]
    fn test_transcript_timestamps_monotonic() {
        let mut s = connected_session();
        s.append_transcript(Speaker::Agent, "first", t0() + Duration::seconds(10)).unwrap();
        let second = s.append_transcript(Speaker::Lead, "second", t0()).unwrap();
        assert_eq!(second.emitted_at, t0() + Duration::seconds(10));
    }

    #[test]
    fn test_mute_requires_connected() {
        let mut s = session();
        assert!(s.toggle_mute().is_err());
        s.start(t0()).unwrap();
        assert!(s.toggle_mute().is_err());
        s.connect(t0()).unwrap();
        assert!(s.toggle_mute().unwrap());
        assert!(!s.toggle_mute().unwrap());
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut s = connected_session();
        s.on_tick(tick(1)).unwrap();
        let outcome = CallOutcome::Success(Disposition::Booked);

        let first = s.end(outcome.clone(), None, t0()).unwrap();
        let second = s.end(outcome, None, t0()).unwrap();
        assert_eq!(first.map(|r| r.duration_seconds), Some(1));
        assert!(second.is_none());
    }

    #[test]
    fn test_end_from_dialing_has_no_start() {
        let mut s = session();
        s.start(t0()).unwrap();
        let result = s
            .end(CallOutcome::Failure(FailureReason::NoAnswer), None, t0())
            .unwrap()
            .unwrap();
        assert!(result.started_at.is_none());
        assert_eq!(result.duration_seconds, 0);
    }

    #[test]
    fn test_end_from_idle_is_invalid() {
        let mut s = session();
        assert!(s.end(CallOutcome::Failure(FailureReason::Dropped), None, t0()).is_err());
    }

    #[test]
    fn test_mutations_after_end_are_closed() {
        let mut s = connected_session();
        s.end(CallOutcome::Success(Disposition::Interested), None, t0()).unwrap();

        for err in [
            s.toggle_mute().unwrap_err(),
            s.toggle_hold().unwrap_err(),
            s.append_transcript(Speaker::Agent, "hello?", t0()).unwrap_err(),
            s.on_tick(tick(9)).unwrap_err(),
            s.start(t0()).unwrap_err(),
        ] {
            assert!(matches!(err, CallEngineError::SessionClosed { .. }));
        }
    }
}
