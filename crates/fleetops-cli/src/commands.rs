//! Subcommands and their dispatch onto the control plane.

use std::fmt;

use clap::{Args, Subcommand};
use fleetops_control::{
    AccessPolicy, AccessReconciler, ControlError, DeviceSelection, LifecycleController,
    LifecycleOutcome, OperationKind, OrderValidator, ReconciliationReport, Result, MAX_WAIT_LIMIT,
};
use fleetops_core::{DeviceId, InstanceId, Target, Uid};
use fleetops_provider::{NewUser, UserFilter, VpnAccess};
use tokio_util::sync::CancellationToken;

use crate::output::{CommandOutput, UserView};

/// One operation against the account.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Power an instance on.
    PowerOn(LifecycleArgs),
    /// Power an instance off (hard).
    PowerOff(LifecycleArgs),
    /// Reboot a running instance.
    Reboot(LifecycleArgs),
    /// Reinstall the operating system. Destroys disk contents.
    Reload(LifecycleArgs),
    /// Cancel (deprovision) an instance. Irreversible.
    Cancel(TargetArgs),
    /// Show one instance.
    Status(TargetArgs),
    /// List every instance on the account.
    List,
    /// Order a new instance from a fixed profile.
    Create {
        /// Hostname for the new instance.
        hostname: String,
        /// Profile key: `webapp` or `minimal`.
        profile: String,
        /// Validate the order without creating anything.
        #[arg(long)]
        dry_run: bool,
        /// Wait for provisioning to finish.
        #[arg(long, conflicts_with = "dry_run")]
        wait: bool,
    },
    /// Reset every non-privileged user to the baseline access policy.
    ReconcileAccess,
    /// Grant every non-privileged user access to devices.
    GrantHardwareAccess(DeviceArgs),
    /// Revoke devices from every non-privileged user.
    RevokeHardwareAccess(DeviceArgs),
    /// Look a user up by exact email or username.
    FindUser(FindUserArgs),
    /// Show a user's status code, hardware access and permissions.
    UserInfo {
        /// User id.
        uid: u64,
    },
    /// Create a portal user with no hardware access or permissions.
    CreateUser(CreateUserArgs),
    /// Disable a portal user.
    DisableUser {
        /// User id.
        uid: u64,
        /// Allow disabling a privileged user.
        #[arg(long)]
        force: bool,
    },
    /// Set a user's VPN flags.
    SetVpn {
        /// User id.
        uid: u64,
        /// Allow SSL VPN.
        #[arg(long, action = clap::ArgAction::Set, required = true)]
        ssl: bool,
        /// Allow PPTP VPN.
        #[arg(long, action = clap::ArgAction::Set, required = true)]
        pptp: bool,
    },
}

/// Instance selection: a hostname or an explicit id.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Hostname of the instance.
    host: Option<String>,
    /// Provider id of the instance.
    #[arg(long)]
    id: Option<u64>,
}

impl TargetArgs {
    /// The selected target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty hostname.
    pub fn target(&self) -> Result<Target> {
        match (&self.host, self.id) {
            (_, Some(id)) => Ok(Target::by_id(InstanceId::new(id))),
            (Some(host), None) => Ok(Target::by_name(host)?),
            (None, None) => Err(ControlError::InvalidInput(
                "either a hostname or --id is required".into(),
            )),
        }
    }
}

/// Target plus whether to wait for the transaction.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LifecycleArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Wait for the provider transaction to complete.
    #[arg(long)]
    wait: bool,
}

/// Device ids for bulk access changes.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DeviceArgs {
    /// Device ids. Empty means every device on the account.
    devices: Vec<u64>,
}

impl DeviceArgs {
    fn selection(&self) -> DeviceSelection {
        if self.devices.is_empty() {
            DeviceSelection::All
        } else {
            DeviceSelection::Only(self.devices.iter().copied().map(DeviceId::new).collect())
        }
    }
}

/// User lookup criteria.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct FindUserArgs {
    /// Exact email address.
    #[arg(long)]
    email: Option<String>,
    /// Exact portal username.
    #[arg(long)]
    username: Option<String>,
}

impl FindUserArgs {
    fn filter(&self) -> Result<UserFilter> {
        match (&self.email, &self.username) {
            (Some(email), _) => Ok(UserFilter::Email(email.clone())),
            (None, Some(username)) => Ok(UserFilter::Username(username.clone())),
            (None, None) => Err(ControlError::InvalidInput(
                "either --email or --username is required".into(),
            )),
        }
    }
}

/// Fields for a new portal user.
#[derive(Args, Clone, PartialEq, Eq)]
pub struct CreateUserArgs {
    /// Portal login name.
    username: String,
    /// Contact email.
    #[arg(long)]
    email: String,
    /// Given name.
    #[arg(long)]
    first_name: String,
    /// Family name.
    #[arg(long)]
    last_name: String,
    /// Initial password.
    #[arg(long, env = "FLEETOPS_NEW_USER_PASSWORD", hide_env_values = true)]
    password: String,
}

impl CreateUserArgs {
    fn new_user(self) -> NewUser {
        NewUser {
            username: self.username,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            password: self.password,
        }
    }
}

impl fmt::Debug for CreateUserArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUserArgs")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Everything a command may need.
pub struct Services {
    /// Lifecycle operations.
    pub controller: LifecycleController,
    /// Orders.
    pub orders: OrderValidator,
    /// Fleet access.
    pub access: AccessReconciler,
    /// Baseline applied by `reconcile-access`.
    pub policy: AccessPolicy,
    /// Aborts in-flight waits.
    pub shutdown: CancellationToken,
}

impl Command {
    /// Short label for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PowerOn(_) => "power-on",
            Self::PowerOff(_) => "power-off",
            Self::Reboot(_) => "reboot",
            Self::Reload(_) => "reload",
            Self::Cancel(_) => "cancel",
            Self::Status(_) => "status",
            Self::List => "list",
            Self::Create { .. } => "create",
            Self::ReconcileAccess => "reconcile-access",
            Self::GrantHardwareAccess(_) => "grant-hardware-access",
            Self::RevokeHardwareAccess(_) => "revoke-hardware-access",
            Self::FindUser(_) => "find-user",
            Self::UserInfo { .. } => "user-info",
            Self::CreateUser(_) => "create-user",
            Self::DisableUser { .. } => "disable-user",
            Self::SetVpn { .. } => "set-vpn",
        }
    }

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns the first error of a single-target command. Fleet-wide
    /// commands report per-user failures inside the output instead.
    pub async fn run(self, services: &Services) -> Result<CommandOutput> {
        match self {
            Self::PowerOn(args) => lifecycle(services, OperationKind::PowerOn, &args).await,
            Self::PowerOff(args) => lifecycle(services, OperationKind::PowerOff, &args).await,
            Self::Reboot(args) => lifecycle(services, OperationKind::Reboot, &args).await,
            Self::Reload(args) => lifecycle(services, OperationKind::Reload, &args).await,
            Self::Cancel(args) => {
                let outcome = services.controller.cancel(&args.target()?).await?;
                encode(&outcome)
            }
            Self::Status(args) => encode(&services.controller.status(&args.target()?).await?),
            Self::List => encode(&services.controller.list().await?),
            Self::Create {
                hostname,
                profile,
                dry_run,
                wait,
            } => {
                if dry_run {
                    encode(&services.orders.validate(&hostname, &profile).await?)
                } else {
                    let outcome = services
                        .orders
                        .create(&hostname, &profile, wait, &services.shutdown)
                        .await?;
                    encode(&outcome)
                }
            }
            Self::ReconcileAccess => {
                fleet(services.access.reconcile(&services.policy).await?)
            }
            Self::GrantHardwareAccess(args) => fleet(
                services
                    .access
                    .grant_hardware_access(&args.selection())
                    .await?,
            ),
            Self::RevokeHardwareAccess(args) => fleet(
                services
                    .access
                    .revoke_hardware_access(&args.selection())
                    .await?,
            ),
            Self::FindUser(args) => {
                let users = services.access.find_users(&args.filter()?).await?;
                let allowlist = services.access.allowlist();
                let views: Vec<UserView> = users
                    .into_iter()
                    .map(|user| UserView::new(user, allowlist))
                    .collect();
                encode(&views)
            }
            Self::UserInfo { uid } => encode(&services.access.user_info(Uid::new(uid)).await?),
            Self::CreateUser(args) => {
                let user = services.access.create_user(&args.new_user()).await?;
                encode(&UserView::new(user, services.access.allowlist()))
            }
            Self::DisableUser { uid, force } => {
                let uid = Uid::new(uid);
                services.access.disable_user(uid, force).await?;
                encode(&serde_json::json!({ "uid": uid, "disabled": true }))
            }
            Self::SetVpn { uid, ssl, pptp } => {
                let uid = Uid::new(uid);
                let access = VpnAccess { ssl, pptp };
                services.access.set_vpn_access(uid, access).await?;
                encode(&serde_json::json!({ "uid": uid, "vpn": access }))
            }
        }
    }
}

async fn lifecycle(
    services: &Services,
    kind: OperationKind,
    args: &LifecycleArgs,
) -> Result<CommandOutput> {
    let target = args.target.target()?;
    let outcome = services.controller.execute(kind, &target, args.wait).await?;
    timed(outcome, services)
}

/// Report a timed-out wait as an error while still returning the outcome.
fn timed(outcome: LifecycleOutcome, services: &Services) -> Result<CommandOutput> {
    let waited = services
        .controller
        .monitor()
        .settings()
        .max_wait
        .min(MAX_WAIT_LIMIT);
    match outcome.clone().ensure_completed(waited) {
        Ok(outcome) => encode(&outcome),
        Err(err) => CommandOutput::with_error(&outcome, err).map_err(encode_error),
    }
}

fn fleet(report: ReconciliationReport) -> Result<CommandOutput> {
    let output = match report.clone().into_result() {
        Ok(report) => CommandOutput::ok(&report),
        Err(err) => CommandOutput::with_error(&report, err),
    };
    output.map_err(encode_error)
}

fn encode(value: &impl serde::Serialize) -> Result<CommandOutput> {
    CommandOutput::ok(value).map_err(encode_error)
}

#[allow(clippy::needless_pass_by_value)]
fn encode_error(err: serde_json::Error) -> ControlError {
    ControlError::InvalidInput(format!("failed to encode result: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_control::{Allowlist, PollSettings, TransactionMonitor};
    use fleetops_core::PermissionKey;
    use fleetops_provider::{MockDirectory, MockProvider, PowerState, User};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn services(provider: Arc<MockProvider>, directory: Arc<MockDirectory>) -> Services {
        let monitor = TransactionMonitor::new(
            provider.clone(),
            PollSettings::fixed(Duration::from_secs(10), Duration::from_secs(60)),
        );
        let shutdown = CancellationToken::new();
        Services {
            controller: LifecycleController::new(provider.clone(), monitor.clone())
                .with_cancellation(shutdown.clone()),
            orders: OrderValidator::new(provider, monitor, fleetops_control::OrderConfig::default()),
            access: AccessReconciler::new(directory, Allowlist::new([Uid::new(1)]), 2),
            policy: AccessPolicy {
                baseline_hardware_access: BTreeSet::new(),
                baseline_portal_permissions: [PermissionKey::ssl_vpn_enabled()].into(),
            },
            shutdown,
        }
    }

    #[test]
    fn device_args_without_ids_select_everything() {
        let all = DeviceArgs { devices: vec![] };
        assert_eq!(all.selection(), DeviceSelection::All);

        let some = DeviceArgs {
            devices: vec![7, 3],
        };
        assert_eq!(
            some.selection(),
            DeviceSelection::Only([DeviceId::new(3), DeviceId::new(7)].into())
        );
    }

    #[test]
    fn id_wins_over_hostname() {
        let args = TargetArgs {
            host: None,
            id: Some(42),
        };
        assert_eq!(args.target().unwrap(), Target::by_id(InstanceId::new(42)));
    }

    #[tokio::test]
    async fn power_on_reports_outcome() {
        let provider = Arc::new(
            MockProvider::new().with_instance(7, "vm-db1", PowerState::Stopped),
        );
        let services = services(provider, Arc::new(MockDirectory::new()));

        let command = Command::PowerOn(LifecycleArgs {
            target: TargetArgs {
                host: Some("vm-db1".into()),
                id: None,
            },
            wait: false,
        });
        let output = command.run(&services).await.unwrap();
        assert_eq!(output.exit_code(), 0);
        assert_eq!(output.result["instance_id"], 7);
        assert_eq!(output.result["operation"], "power-on");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_wait_keeps_the_outcome() {
        let provider = Arc::new(
            MockProvider::new().with_instance(7, "vm-db1", PowerState::Stopped),
        );
        provider.set_polls_until_ready(None);
        let services = services(provider, Arc::new(MockDirectory::new()));

        let command = Command::PowerOn(LifecycleArgs {
            target: TargetArgs {
                host: None,
                id: Some(7),
            },
            wait: true,
        });
        let output = command.run(&services).await.unwrap();
        assert_eq!(output.exit_code(), 8);
        assert_eq!(output.result["transaction"], "timed_out");
    }

    #[tokio::test]
    async fn missing_host_is_not_found() {
        let services = services(Arc::new(MockProvider::new()), Arc::new(MockDirectory::new()));
        let command = Command::Status(TargetArgs {
            host: Some("vm-ghost".into()),
            id: None,
        });
        let err = command.run(&services).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn find_user_marks_privileged_accounts() {
        let directory = Arc::new(
            MockDirectory::new()
                .with_user(User::new(Uid::new(1), "itadmin", "it@example.com"))
                .with_user(User::new(Uid::new(2), "dev", "dev@example.com")),
        );
        let services = services(Arc::new(MockProvider::new()), directory);

        let command = Command::FindUser(FindUserArgs {
            email: None,
            username: Some("itadmin".into()),
        });
        let output = command.run(&services).await.unwrap();
        assert_eq!(output.result[0]["uid"], 1);
        assert_eq!(output.result[0]["privileged"], true);
    }

    fn create_user_args(username: &str) -> CreateUserArgs {
        CreateUserArgs {
            username: username.into(),
            email: format!("{username}@example.com"),
            first_name: "Dana".into(),
            last_name: "Ops".into(),
            password: "Correct-Horse-7".into(),
        }
    }

    #[tokio::test]
    async fn create_user_never_echoes_the_password() {
        let directory = Arc::new(
            MockDirectory::new().with_user(User::new(Uid::new(1), "itadmin", "it@example.com")),
        );
        let services = services(Arc::new(MockProvider::new()), directory.clone());

        let command = Command::CreateUser(create_user_args("dana"));
        assert!(!format!("{command:?}").contains("Correct-Horse-7"));

        let output = command.run(&services).await.unwrap();
        assert_eq!(output.exit_code(), 0);
        assert_eq!(output.result["uid"], 2);
        assert_eq!(output.result["privileged"], false);
        assert!(!output.result.to_string().contains("Correct-Horse-7"));
        assert_eq!(
            directory.writes(),
            vec![fleetops_provider::DirectoryWrite::Created(Uid::new(2), "dana".into())]
        );
    }

    #[tokio::test]
    async fn user_info_reports_status_code() {
        let directory = Arc::new(
            MockDirectory::new().with_user(User::new(Uid::new(1), "itadmin", "it@example.com")),
        );
        let services = services(Arc::new(MockProvider::new()), directory);

        let output = Command::UserInfo { uid: 1 }.run(&services).await.unwrap();
        assert_eq!(output.result["username"], "itadmin");
        assert_eq!(output.result["status"], "active");
        assert_eq!(output.result["status_code"], 1001);
        assert_eq!(output.result["privileged"], true);

        let err = Command::UserInfo { uid: 5 }.run(&services).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn reconcile_failure_exits_with_partial_failure() {
        let directory = Arc::new(
            MockDirectory::new()
                .with_user(User::new(Uid::new(1), "itadmin", "it@example.com"))
                .with_user(User::new(Uid::new(2), "dev", "dev@example.com"))
                .with_user(User::new(Uid::new(3), "ops", "ops@example.com")),
        );
        directory.fail_writes_for(Uid::new(3));
        let services = services(Arc::new(MockProvider::new()), directory);

        let output = Command::ReconcileAccess.run(&services).await.unwrap();
        assert_eq!(output.exit_code(), 9);
        assert_eq!(output.result["outcomes"]["2"]["status"], "updated");
        assert_eq!(output.result["outcomes"]["3"]["status"], "failed");
        assert_eq!(output.result["skipped"], serde_json::json!([1]));
    }
}
