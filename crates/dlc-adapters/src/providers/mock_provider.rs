//! `PolicyProvider` en memoria.
//!
//! Reproduce el contrato observable del head-end real: ids secuenciales,
//! respuestas con `statusCode`/`message`, replace como reemplazo de la
//! política vigente del medidor, y sesiones reutilizadas mientras no
//! venzan. Soporta inyección de fallas por operación para ejercitar los
//! caminos de `DECLINED` en tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlc_core::constants::{HTTP_SUCCESS, PROVIDER_SESSION_LIFETIME_SECONDS};
use dlc_core::{build_policy_name, CoreError, PolicyProvider, PolicyReply};
use log::info;

use crate::session::SessionManager;

/// Política registrada en el head-end simulado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPolicy {
    pub policy_id: i64,
    pub name: String,
    pub meter_serials: Vec<String>,
    pub turn_off: bool,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub replace: bool,
    pub deployed: bool,
}

/// Fallas inyectables por operación (mensaje devuelto con status 400).
#[derive(Debug, Default)]
struct FailureInjection {
    on_create: Option<String>,
    on_deploy: Option<String>,
}

/// Head-end en memoria.
#[derive(Debug)]
pub struct MockPolicyProvider {
    policies: Mutex<HashMap<i64, MockPolicy>>,
    next_policy_id: AtomicI64,
    failures: Mutex<FailureInjection>,
    session: SessionManager,
}

impl Default for MockPolicyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPolicyProvider {
    pub fn new() -> Self {
        MockPolicyProvider { policies: Mutex::new(HashMap::new()),
                             next_policy_id: AtomicI64::new(1000),
                             failures: Mutex::new(FailureInjection::default()),
                             session: SessionManager::new(PROVIDER_SESSION_LIFETIME_SECONDS) }
    }

    fn lock_policies(&self) -> MutexGuard<'_, HashMap<i64, MockPolicy>> {
        self.policies.lock().expect("mock provider lock poisoned")
    }

    /// Las próximas creaciones fallan con este mensaje (status 400).
    pub fn fail_creates_with(&self, message: &str) {
        self.failures.lock().expect("mock provider lock poisoned").on_create = Some(message.to_string());
    }

    /// Los próximos deploys fallan con este mensaje (status 400).
    pub fn fail_deploys_with(&self, message: &str) {
        self.failures.lock().expect("mock provider lock poisoned").on_deploy = Some(message.to_string());
    }

    /// Limpia las fallas inyectadas.
    pub fn clear_failures(&self) {
        let mut failures = self.failures.lock().expect("mock provider lock poisoned");
        failures.on_create = None;
        failures.on_deploy = None;
    }

    /// Política por id, para aserciones de tests.
    pub fn policy(&self, policy_id: i64) -> Option<MockPolicy> {
        self.lock_policies().get(&policy_id).cloned()
    }

    /// Cantidad de políticas registradas.
    pub fn policy_count(&self) -> usize {
        self.lock_policies().len()
    }

    /// Cantidad de logins de sesión realizados.
    pub fn session_login_count(&self) -> u64 {
        self.session.login_count()
    }
}

#[async_trait]
impl PolicyProvider for MockPolicyProvider {
    async fn create_override_policy(&self,
                                    meter_serials: &[String],
                                    turn_off: bool,
                                    start: DateTime<Utc>,
                                    duration_minutes: i64,
                                    replace: bool)
                                    -> Result<(String, PolicyReply), CoreError> {
        let policy_name = build_policy_name(turn_off, meter_serials, Utc::now().timestamp());

        if let Some(message) = self.failures.lock().expect("mock provider lock poisoned").on_create.clone() {
            return Ok((policy_name, PolicyReply { status_code: 400, message, policy_id: None }));
        }

        self.session.with_session(|_session_id| {
            let policy_id = self.next_policy_id.fetch_add(1, Ordering::SeqCst);
            info!("creating override policy {policy_name} ({policy_id}); replace: {replace}");

            let mut policies = self.lock_policies();
            if replace {
                // Replace desplaza la política vigente de esos medidores.
                policies.retain(|_, p| !p.meter_serials.iter().any(|m| meter_serials.contains(m)));
            }
            policies.insert(policy_id,
                            MockPolicy { policy_id,
                                         name: policy_name.clone(),
                                         meter_serials: meter_serials.to_vec(),
                                         turn_off,
                                         start,
                                         duration_minutes,
                                         replace,
                                         deployed: false });

            Ok((policy_name.clone(),
                PolicyReply { status_code: HTTP_SUCCESS,
                              message: "Direct load control override policy created successfully".into(),
                              policy_id: Some(policy_id) }))
        })
    }

    async fn deploy_policy(&self, policy_id: i64) -> Result<PolicyReply, CoreError> {
        if let Some(message) = self.failures.lock().expect("mock provider lock poisoned").on_deploy.clone() {
            return Ok(PolicyReply { status_code: 400, message, policy_id: Some(policy_id) });
        }

        self.session.with_session(|_session_id| {
            let mut policies = self.lock_policies();
            match policies.get_mut(&policy_id) {
                Some(policy) => {
                    policy.deployed = true;
                    info!("deploying policy with policy id {policy_id}");
                    Ok(PolicyReply { status_code: HTTP_SUCCESS,
                                     message: format!("Policy {policy_id} deployed successfully"),
                                     policy_id: Some(policy_id) })
                }
                None => Ok(PolicyReply { status_code: 400,
                                         message: format!("Policy {policy_id} does not exist"),
                                         policy_id: Some(policy_id) }),
            }
        })
    }

    async fn undeploy_policy(&self, policy_id: i64) -> Result<(), CoreError> {
        self.session.with_session(|_session_id| {
            let mut policies = self.lock_policies();
            let policy = policies.get_mut(&policy_id)
                                 .ok_or_else(|| CoreError::Internal(format!("policy {policy_id} not found")))?;
            policy.deployed = false;
            info!("undeploying policy id {policy_id}");
            Ok(())
        })
    }

    async fn delete_policy(&self, policy_id: i64) -> Result<(), CoreError> {
        self.session.with_session(|_session_id| {
            info!("deleting policy id {policy_id}");
            self.lock_policies()
                .remove(&policy_id)
                .map(|_| ())
                .ok_or_else(|| CoreError::Internal(format!("policy {policy_id} not found")))
        })
    }

    async fn policy_exists(&self, policy_id: i64) -> Result<bool, CoreError> {
        Ok(self.lock_policies().contains_key(&policy_id))
    }
}
