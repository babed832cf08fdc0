use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::{JoinError, JoinResult};
use crate::network::profile::build_profile;
use crate::network::store::{ProfileStore, RadioControl};
use crate::network::types::{ConnectivityEvent, ProfileId, QuotedSsid, TargetNetwork};

/// Wait between association attempts while the OS works on joining.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How a completed session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Joined { ssid: String },
    Disconnected,
}

/// Fixed-shape completion line the automation harness scans stdout for.
/// Reproduced exactly, including the mode name and trailing content.
pub fn completion_line(uniq: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Joined { ssid } => format!("{uniq} Mode connect run completed {ssid}"),
        Outcome::Disconnected => format!("{uniq} Mode disconnect run completed"),
    }
}

/// Connect-path lifecycle. Exactly one terminal transition happens per
/// session; the consuming run loop makes a second one unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinState {
    AwaitingRadio,
    ResolvingProfile,
    Retrying,
    Joined,
}

/// In-flight state of one connect operation.
struct JoinSession {
    state: JoinState,
    retry: Option<RetryLoop>,
}

impl JoinSession {
    fn new() -> Self {
        Self {
            state: JoinState::AwaitingRadio,
            retry: None,
        }
    }
}

/// Coordinates the profile store, permission policy, and connectivity
/// events into one deterministic join or disconnect operation.
pub struct Orchestrator {
    radio: Arc<dyn RadioControl>,
    store: Arc<dyn ProfileStore>,
    caller: Option<String>,
    device_owner: bool,
    retry_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        store: Arc<dyn ProfileStore>,
        caller: Option<String>,
        device_owner: bool,
        retry_interval: Duration,
    ) -> Self {
        Self {
            radio,
            store,
            caller,
            device_owner,
            retry_interval,
        }
    }

    /// Drive a connect session to its terminal state, consuming the event
    /// stream for the session's lifetime. An `Err` is the `Aborted` state;
    /// no completion signal may be emitted for it.
    pub async fn join(
        &self,
        target: &TargetNetwork,
        mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    ) -> JoinResult<Outcome> {
        let mut session = JoinSession::new();

        // Power the radio on, or synthesize the enabled transition when
        // it already is.
        if self.radio.radio_enabled().await? {
            self.on_radio_enabled(&mut session, target).await?;
        } else {
            self.radio.set_radio_enabled(true).await?;
        }

        while let Some(event) = events.recv().await {
            match event {
                ConnectivityEvent::RadioEnabled => {
                    self.on_radio_enabled(&mut session, target).await?;
                }
                ConnectivityEvent::Associated(ssid) => {
                    if self.on_associated(&mut session, target, &ssid).await {
                        return Ok(Outcome::Joined {
                            ssid: target.ssid.clone(),
                        });
                    }
                }
                ConnectivityEvent::Other => {}
            }
        }

        // The event source closed under us: the subscription was torn
        // down from outside. Wind the retry loop down before reporting.
        if let Some(retry) = session.retry.take() {
            retry.shutdown().await;
        }
        Err(JoinError::Cancelled)
    }

    /// Disconnect mode never touches the profile store: drop the current
    /// association, then power the radio down.
    pub async fn disconnect(&self) -> JoinResult<Outcome> {
        if self.radio.radio_enabled().await? {
            if let Err(e) = self.radio.disconnect().await {
                warn!("disconnect before radio-off failed: {e}");
            }
            self.radio.set_radio_enabled(false).await?;
        }
        Ok(Outcome::Disconnected)
    }

    /// AwaitingRadio -> ResolvingProfile -> Retrying.
    async fn on_radio_enabled(
        &self,
        session: &mut JoinSession,
        target: &TargetNetwork,
    ) -> JoinResult<()> {
        if session.state != JoinState::AwaitingRadio {
            // Duplicate power notification; the loop is already running.
            return Ok(());
        }
        session.state = JoinState::ResolvingProfile;
        let id = self.resolve_profile(target).await?;
        info!("Joining profile {}", id);
        session.state = JoinState::Retrying;
        session.retry = Some(RetryLoop::start(
            self.radio.clone(),
            self.store.clone(),
            id,
            self.retry_interval,
        ));
        Ok(())
    }

    /// Reuse, rewrite, or create the profile for the target SSID.
    async fn resolve_profile(&self, target: &TargetNetwork) -> JoinResult<ProfileId> {
        match self.store.find_by_ssid(&target.quoted_ssid()).await? {
            None => {
                let mut profile = build_profile(target, None);
                profile.creator = self.caller.clone();
                self.store.register(&profile).await
            }
            Some(existing) => {
                if auth::may_modify(&existing, self.caller.as_deref(), self.device_owner) {
                    debug!("permitted to rewrite the existing profile for {}", target.ssid);
                    let profile = build_profile(target, Some(&existing));
                    self.store.update(&profile).await
                } else {
                    info!(
                        "not permitted to modify a profile created elsewhere; joining {} as configured",
                        target.ssid
                    );
                    existing.id.clone().ok_or_else(|| {
                        JoinError::InvalidNetworkConfiguration(
                            "existing profile has no usable id".into(),
                        )
                    })
                }
            }
        }
    }

    /// Retrying -> Joined, only on an exact quoted-SSID match.
    async fn on_associated(
        &self,
        session: &mut JoinSession,
        target: &TargetNetwork,
        ssid: &QuotedSsid,
    ) -> bool {
        if session.state != JoinState::Retrying || *ssid != target.quoted_ssid() {
            return false;
        }
        // Stop the retry loop and wait for its acknowledgement before the
        // session is declared complete; a late attempt must not fire
        // after teardown.
        if let Some(retry) = session.retry.take() {
            retry.shutdown().await;
        }
        session.state = JoinState::Joined;
        info!("Device associated with {}", target.ssid);
        true
    }
}

/// Handle to the background association retry task.
struct RetryLoop {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetryLoop {
    /// Drop any current association, then request activation at a fixed
    /// interval until cancelled. Attempt failures are absorbed: the OS
    /// may fail silently (wrong password), and the next attempt covers
    /// it. There is deliberately no retry ceiling.
    fn start(
        radio: Arc<dyn RadioControl>,
        store: Arc<dyn ProfileStore>,
        id: ProfileId,
        interval: Duration,
    ) -> Self {
        let (cancel, mut cancelled) = watch::channel(false);
        let task = tokio::spawn(async move {
            // Shake off whatever the interface is currently attached to.
            if let Err(e) = radio.disconnect().await {
                debug!("pre-join disconnect failed: {e}");
            }
            loop {
                if *cancelled.borrow() {
                    break;
                }
                debug!("requesting association, profile id={}", id);
                if let Err(e) = store.activate(&id).await {
                    warn!("activation request failed: {e}");
                }
                // Wait and see if it worked. Otherwise try again.
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        Self { cancel, task }
    }

    /// Cooperative cancel + join: once this returns, no further
    /// activation attempt can fire.
    async fn shutdown(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::{KeyManagement, NetworkProfile, SecurityKind};

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        FindBySsid(QuotedSsid),
        Register(NetworkProfile),
        Update(NetworkProfile),
        Activate(ProfileId),
        Disconnect,
        SetRadio(bool),
    }

    struct FakeStation {
        radio_on: AtomicBool,
        existing: Mutex<Option<NetworkProfile>>,
        fail_register: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeStation {
        fn new() -> Self {
            Self {
                radio_on: AtomicBool::new(true),
                existing: Mutex::new(None),
                fail_register: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_radio_off(self) -> Self {
            self.radio_on.store(false, Ordering::SeqCst);
            self
        }

        fn with_existing(self, profile: NetworkProfile) -> Self {
            *self.existing.lock().unwrap() = Some(profile);
            self
        }

        fn failing_register(mut self) -> Self {
            self.fail_register = true;
            self
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProfileStore for FakeStation {
        async fn find_by_ssid(&self, ssid: &QuotedSsid) -> JoinResult<Option<NetworkProfile>> {
            self.record(Call::FindBySsid(ssid.clone()));
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn register(&self, profile: &NetworkProfile) -> JoinResult<ProfileId> {
            self.record(Call::Register(profile.clone()));
            if self.fail_register {
                return Err(JoinError::InvalidNetworkConfiguration(
                    "rejected by the OS".into(),
                ));
            }
            Ok(ProfileId("/profiles/1".into()))
        }

        async fn update(&self, profile: &NetworkProfile) -> JoinResult<ProfileId> {
            self.record(Call::Update(profile.clone()));
            Ok(profile.id.clone().expect("update requires a registered id"))
        }

        async fn activate(&self, id: &ProfileId) -> JoinResult<()> {
            self.record(Call::Activate(id.clone()));
            Ok(())
        }
    }

    #[async_trait]
    impl RadioControl for FakeStation {
        async fn radio_enabled(&self) -> JoinResult<bool> {
            Ok(self.radio_on.load(Ordering::SeqCst))
        }

        async fn set_radio_enabled(&self, enabled: bool) -> JoinResult<()> {
            self.record(Call::SetRadio(enabled));
            self.radio_on.store(enabled, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> JoinResult<()> {
            self.record(Call::Disconnect);
            Ok(())
        }
    }

    fn orchestrator(station: &Arc<FakeStation>) -> Orchestrator {
        Orchestrator::new(
            station.clone(),
            station.clone(),
            Some("tester".into()),
            false,
            Duration::from_secs(10),
        )
    }

    fn wpa_target() -> TargetNetwork {
        TargetNetwork {
            ssid: "LabNet".into(),
            security: SecurityKind::Wpa,
            password: Some("s3cret".into()),
        }
    }

    fn open_target(ssid: &str) -> TargetNetwork {
        TargetNetwork {
            ssid: ssid.into(),
            security: SecurityKind::None,
            password: None,
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn completion_lines_match_the_harness_contract() {
        assert_eq!(
            completion_line(
                "t7",
                &Outcome::Joined {
                    ssid: "LabNet".into()
                }
            ),
            "t7 Mode connect run completed LabNet"
        );
        assert_eq!(
            completion_line("t1", &Outcome::Disconnected),
            "t1 Mode disconnect run completed"
        );
    }

    #[test]
    fn empty_uniq_still_leads_the_completion_line() {
        assert_eq!(
            completion_line("", &Outcome::Disconnected),
            " Mode disconnect run completed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_wpa_network_registers_and_retries_until_associated() {
        let station = Arc::new(FakeStation::new());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = wpa_target();

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });

        // Three attempts land at t=0s, 10s, 20s before the association.
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Joined {
                ssid: "LabNet".into()
            }
        );

        let calls = station.calls();
        assert_eq!(calls[0], Call::FindBySsid(QuotedSsid::quote("LabNet")));
        let Call::Register(profile) = &calls[1] else {
            panic!("expected a register call, got {:?}", calls[1]);
        };
        assert_eq!(profile.security.psk.as_deref(), Some("\"s3cret\""));
        assert_eq!(profile.creator.as_deref(), Some("tester"));
        assert_eq!(calls[2], Call::Disconnect);
        let expected = Call::Activate(ProfileId("/profiles/1".into()));
        assert_eq!(
            calls[3..].to_vec(),
            vec![expected.clone(), expected.clone(), expected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_further_activation_after_the_session_joins() {
        let station = Arc::new(FakeStation::new());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = wpa_target();

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        // Deliver the association twice; the session completes once.
        let associated = ConnectivityEvent::Associated(QuotedSsid::quote("LabNet"));
        tx.send(associated.clone()).unwrap();
        tx.send(associated).unwrap();

        assert!(handle.await.unwrap().is_ok());

        // The retry loop is joined; even a timer about to fire must not
        // produce another attempt.
        let attempts_at_completion = station.calls().len();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(station.calls().len(), attempts_at_completion);
    }

    #[tokio::test(start_paused = true)]
    async fn radio_off_requests_enable_and_waits_for_the_event() {
        let station = Arc::new(FakeStation::new().with_radio_off());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = open_target("LabNet");

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        let calls = station.calls();
        assert_eq!(calls, vec![Call::SetRadio(true)]);

        tx.send(ConnectivityEvent::RadioEnabled).unwrap();
        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Joined {
                ssid: "LabNet".into()
            }
        );
        assert!(station
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Register(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_radio_enabled_events_start_only_one_retry_loop() {
        let station = Arc::new(FakeStation::new().with_radio_off());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = open_target("LabNet");

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        tx.send(ConnectivityEvent::RadioEnabled).unwrap();
        tx.send(ConnectivityEvent::RadioEnabled).unwrap();
        settle().await;

        let registers = station
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Register(_)))
            .count();
        assert_eq!(registers, 1);

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_own_profile_is_updated_not_registered() {
        let mut existing = NetworkProfile::new(QuotedSsid::quote("Open"));
        existing.id = Some(ProfileId("/profiles/7".into()));
        existing.creator = Some("tester".into());

        let station = Arc::new(FakeStation::new().with_existing(existing));
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = open_target("Open");

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("Open")))
            .unwrap();
        assert!(handle.await.unwrap().is_ok());

        let calls = station.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Register(_))));
        let update = calls.iter().find_map(|c| match c {
            Call::Update(profile) => Some(profile.clone()),
            _ => None,
        });
        let updated = update.expect("expected an update call");
        assert_eq!(updated.security.key_mgmt, KeyManagement::None);
        assert_eq!(updated.id, Some(ProfileId("/profiles/7".into())));
        assert!(calls.contains(&Call::Activate(ProfileId("/profiles/7".into()))));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_profile_is_joined_as_configured() {
        let mut existing = NetworkProfile::new(QuotedSsid::quote("Open"));
        existing.id = Some(ProfileId("/profiles/9".into()));
        existing.creator = Some("someone-else".into());

        let station = Arc::new(FakeStation::new().with_existing(existing));
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = open_target("Open");

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("Open")))
            .unwrap();
        assert!(handle.await.unwrap().is_ok());

        let calls = station.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Register(_))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Update(_))));
        assert!(calls.contains(&Call::Activate(ProfileId("/profiles/9".into()))));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_aborts_without_retrying() {
        let station = Arc::new(FakeStation::new().failing_register());
        let orch = orchestrator(&station);
        let (_tx, rx) = mpsc::unbounded_channel();
        let target = wpa_target();

        let err = orch.join(&target, rx).await.unwrap_err();
        assert!(matches!(err, JoinError::InvalidNetworkConfiguration(_)));
        assert!(!station
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Activate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_ssid_association_does_not_complete_the_session() {
        let station = Arc::new(FakeStation::new());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = wpa_target();

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("GuestNet")))
            .unwrap();
        tx.send(ConnectivityEvent::Other).unwrap();
        settle().await;
        assert!(!handle.is_finished());

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Joined {
                ssid: "LabNet".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn association_before_the_radio_event_is_ignored() {
        let station = Arc::new(FakeStation::new().with_radio_off());
        let orch = orchestrator(&station);
        let (tx, rx) = mpsc::unbounded_channel();
        let target = open_target("LabNet");

        let handle = tokio::spawn(async move { orch.join(&target, rx).await });
        settle().await;

        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();
        settle().await;
        assert!(!handle.is_finished());
        assert!(!station
            .calls()
            .iter()
            .any(|c| matches!(c, Call::FindBySsid(_))));

        tx.send(ConnectivityEvent::RadioEnabled).unwrap();
        tx.send(ConnectivityEvent::Associated(QuotedSsid::quote("LabNet")))
            .unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn disconnect_powers_down_without_touching_the_profile_store() {
        let station = Arc::new(FakeStation::new());
        let orch = orchestrator(&station);

        let outcome = orch.disconnect().await.unwrap();
        assert_eq!(outcome, Outcome::Disconnected);
        assert_eq!(
            station.calls(),
            vec![Call::Disconnect, Call::SetRadio(false)]
        );
    }

    #[tokio::test]
    async fn disconnect_with_radio_already_off_is_a_no_op() {
        let station = Arc::new(FakeStation::new().with_radio_off());
        let orch = orchestrator(&station);

        let outcome = orch.disconnect().await.unwrap();
        assert_eq!(outcome, Outcome::Disconnected);
        assert!(station.calls().is_empty());
    }
}
