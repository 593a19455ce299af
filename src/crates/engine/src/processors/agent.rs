//! Main agent processor (C12): orchestrates per-state sub-processors, the
//! wakeup ritual, and shutdown negotiation.

use super::dream::DreamProcessor;
use super::play::PlayProcessor;
use super::shutdown::{NegotiationOutcome, ShutdownProcessor, MAX_NEGOTIATION_ROUNDS};
use super::solitude::SolitudeProcessor;
use super::state::{AgentState, StateMachine, WAKEUP_COMPLETE_FLAG};
use super::wakeup::WakeupProcessor;
use super::work::WorkProcessor;
use super::{Processor, ProcessorStatus};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::persistence::Persistence;
use crate::shutdown::ShutdownCoordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Inter-round delays per state
#[derive(Debug, Clone, Copy)]
pub struct ProcessingDelays {
    pub wakeup: Duration,
    pub work: Duration,
    pub solitude: Duration,
    pub dream: Duration,
    pub default: Duration,
}

impl Default for ProcessingDelays {
    fn default() -> Self {
        Self {
            wakeup: Duration::from_secs(1),
            work: Duration::from_secs(3),
            solitude: Duration::from_secs(10),
            dream: Duration::from_secs(5),
            default: Duration::from_secs(1),
        }
    }
}

impl ProcessingDelays {
    /// Zero delays, for tests
    pub fn none() -> Self {
        Self {
            wakeup: Duration::ZERO,
            work: Duration::ZERO,
            solitude: Duration::ZERO,
            dream: Duration::ZERO,
            default: Duration::ZERO,
        }
    }

    fn for_state(&self, state: AgentState) -> Duration {
        match state {
            AgentState::Wakeup => self.wakeup,
            AgentState::Work | AgentState::Play => self.work,
            AgentState::Solitude => self.solitude,
            AgentState::Dream => self.dream,
            AgentState::Shutdown => self.default,
        }
    }
}

/// Default dream cycle length when entering DREAM
const DREAM_DURATION: Duration = Duration::from_secs(600);

/// Point-in-time processor status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub state_duration_secs: f64,
    pub round_number: u32,
    pub is_processing: bool,
    pub processor_status: Vec<ProcessorStatus>,
}

/// The main processor
pub struct AgentProcessor {
    state: StateMachine,
    wakeup: WakeupProcessor,
    work: WorkProcessor,
    play: PlayProcessor,
    solitude: SolitudeProcessor,
    dream: DreamProcessor,
    shutdown_processor: ShutdownProcessor,
    shutdown: ShutdownCoordinator,
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    delays: ProcessingDelays,
    current_round: u32,
    processing: bool,
    stopped: bool,
}

impl AgentProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wakeup: WakeupProcessor,
        work: WorkProcessor,
        play: PlayProcessor,
        solitude: SolitudeProcessor,
        dream: DreamProcessor,
        shutdown_processor: ShutdownProcessor,
        shutdown: ShutdownCoordinator,
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        delays: ProcessingDelays,
    ) -> Self {
        Self {
            state: StateMachine::new(clock.clone()),
            wakeup,
            work,
            play,
            solitude,
            dream,
            shutdown_processor,
            shutdown,
            persistence,
            clock,
            delays,
            current_round: 0,
            processing: false,
            stopped: false,
        }
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Run the agent: wakeup ritual, then the state-driven loop
    ///
    /// `num_rounds` bounds the total rounds (wakeup included); `None`
    /// runs until shutdown is requested.
    pub async fn start_processing(&mut self, num_rounds: Option<u32>) -> Result<()> {
        if self.processing {
            warn!("Processing is already running");
            return Ok(());
        }
        self.processing = true;
        self.stopped = false;

        info!(
            rounds = num_rounds.map(|n| n.to_string()).unwrap_or_else(|| "infinite".into()),
            "Starting agent processing"
        );

        if !self.state.transition_to(AgentState::Wakeup) {
            self.processing = false;
            return Err(EngineError::ShutdownRequested(
                "cannot begin wakeup from the current state".to_string(),
            ));
        }

        self.wakeup.initialize().await?;

        // Wakeup rounds until the ritual completes
        while !self.should_stop() && !self.rounds_exhausted(num_rounds) {
            self.current_round += 1;
            let result = self.wakeup.process(self.current_round).await?;

            info!(
                round = self.current_round,
                processed = result.thoughts_processed,
                "Wakeup round finished"
            );

            if result.wakeup_complete {
                self.state.set_flag(WAKEUP_COMPLETE_FLAG, true);
                break;
            }
            self.sleep_between_rounds(AgentState::Wakeup).await;
        }

        if !self.state.flag(WAKEUP_COMPLETE_FLAG) {
            warn!("Wakeup did not complete; stopping");
            self.stop_processing().await?;
            return Ok(());
        }

        // Only WAKEUP→WORK is automatic
        if let Some(next) = self.state.should_auto_transition() {
            self.handle_transition(next).await?;
        }

        self.processing_loop(num_rounds).await?;

        self.processing = false;
        Ok(())
    }

    async fn processing_loop(&mut self, num_rounds: Option<u32>) -> Result<()> {
        while !self.should_stop() {
            if self.rounds_exhausted(num_rounds) {
                self.shutdown.request_shutdown(format!(
                    "processing completed after {} rounds",
                    self.current_round
                ));
                break;
            }

            self.current_round += 1;

            if let Some(next) = self.state.should_auto_transition() {
                self.handle_transition(next).await?;
            }

            let state = self.state.current_state();
            match state {
                AgentState::Work => {
                    if let Err(e) = self.work.process(self.current_round).await {
                        error!(error = %e, "Work round failed");
                    }
                }
                AgentState::Play => {
                    if let Err(e) = self.play.process(self.current_round).await {
                        error!(error = %e, "Play round failed");
                    }
                }
                AgentState::Solitude => match self.solitude.process(self.current_round).await {
                    Ok(result) if result.should_exit_state => {
                        info!(
                            reason = result.exit_reason.as_deref().unwrap_or("unspecified"),
                            "Exiting solitude"
                        );
                        self.handle_transition(AgentState::Work).await?;
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Solitude round failed"),
                },
                AgentState::Dream => {
                    // The dream pulse loop runs on its own task
                    let _ = self.dream.process(self.current_round).await;
                }
                AgentState::Wakeup => {
                    let _ = self.wakeup.process(self.current_round).await;
                }
                AgentState::Shutdown => {
                    info!("In SHUTDOWN state; leaving processing loop");
                    break;
                }
            }

            self.sleep_between_rounds(state).await;
        }

        info!("Processing loop finished");
        Ok(())
    }

    /// Explicit state transition, initializing the target processor
    pub async fn handle_transition(&mut self, target: AgentState) -> Result<()> {
        let from = self.state.current_state();
        if !self.state.transition_to(target) {
            return Err(EngineError::Validation(format!(
                "invalid transition {} -> {}",
                from, target
            )));
        }

        if from == AgentState::Dream {
            self.dream.stop_dreaming().await;
            info!(summary = ?self.dream.summary(), "Dream cycle summary");
        }

        match target {
            AgentState::Work => self.work.initialize().await?,
            AgentState::Play => self.play.initialize().await?,
            AgentState::Solitude => self.solitude.initialize().await?,
            AgentState::Dream => {
                self.dream.initialize().await?;
                self.dream.start_dreaming(DREAM_DURATION);
            }
            AgentState::Wakeup => self.wakeup.initialize().await?,
            AgentState::Shutdown => {}
        }

        Ok(())
    }

    /// Run the bounded shutdown negotiation (called once the runtime has
    /// transitioned the machine to SHUTDOWN)
    pub async fn run_shutdown_negotiation(
        &mut self,
        reason: &str,
    ) -> Result<Option<NegotiationOutcome>> {
        self.shutdown_processor.set_shutdown_reason(reason);
        self.shutdown_processor.initialize().await?;

        for round in 0..MAX_NEGOTIATION_ROUNDS {
            match self.shutdown_processor.process(round).await {
                Ok(_) if self.shutdown_processor.is_complete() => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Shutdown negotiation round failed");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(self.shutdown_processor.outcome().cloned())
    }

    /// Stop processing: cleanup every sub-processor and enter SHUTDOWN
    ///
    /// After this returns no new tasks or thoughts are created.
    pub async fn stop_processing(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        info!("Stopping agent processing");
        self.stopped = true;

        self.dream.stop_dreaming().await;
        self.wakeup.cleanup().await?;
        self.work.cleanup().await?;
        self.play.cleanup().await?;
        self.solitude.cleanup().await?;
        self.dream.cleanup().await?;
        self.shutdown_processor.cleanup().await?;

        if self.state.current_state() != AgentState::Shutdown {
            self.state.transition_to(AgentState::Shutdown);
        }
        self.processing = false;
        Ok(())
    }

    pub fn get_status(&self) -> AgentStatus {
        AgentStatus {
            state: self.state.current_state(),
            state_duration_secs: self.state.state_duration_secs(),
            round_number: self.current_round,
            is_processing: self.processing && !self.stopped,
            processor_status: vec![
                self.wakeup.get_status(),
                self.work.get_status(),
                self.play.get_status(),
                self.solitude.get_status(),
                self.dream.get_status(),
                self.shutdown_processor.get_status(),
            ],
        }
    }

    pub fn persistence(&self) -> &Arc<Persistence> {
        &self.persistence
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn should_stop(&self) -> bool {
        self.stopped || self.shutdown.is_shutdown_requested()
    }

    fn rounds_exhausted(&self, num_rounds: Option<u32>) -> bool {
        num_rounds.map(|max| self.current_round >= max).unwrap_or(false)
    }

    async fn sleep_between_rounds(&self, state: AgentState) {
        let delay = self.delays.for_state(state);
        if delay.is_zero() || self.should_stop() {
            return;
        }
        tokio::select! {
            _ = self.shutdown.wait_for_shutdown() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
