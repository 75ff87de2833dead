use crate::{
    admission::Admission,
    apply::{OverrideApplier, OverrideManager, Resolver, ValidateApplier, ValidateManager},
    compiler::Compiler,
    core::{Engine, ObjectStore},
    cue::CueCli,
    index::{KubeStore, PolicyIndex},
    interrupt::{Credentials, Interrupters, PolicyInterrupter},
    k8s::{
        gvk_of,
        policy::{
            ClusterOverridePolicy, ClusterOverridePolicySpec, ClusterValidatePolicy,
            ClusterValidatePolicySpec, OverridePolicy, OverridePolicySpec,
        },
    },
    token::{self, TokenManager},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "policy",
    about = "Applies override and validate policies at admission time"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "praetor=info,warn",
        env = "PRAETOR_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// The CUE command-line tool rule programs are evaluated with.
    #[clap(long, default_value = "cue")]
    cue_binary: PathBuf,

    /// Bounds each invocation of the CUE tool; slower invocations are killed.
    #[clap(long, default_value = "5000")]
    cue_timeout_ms: u64,

    /// Bounds requests made for http value references and token refreshes.
    #[clap(long, default_value = "3000")]
    http_timeout_ms: u64,

    /// Bounds cluster reads made while resolving value references.
    #[clap(long, default_value = "1000")]
    store_timeout_ms: u64,

    #[clap(long, default_value = "1000")]
    token_heartbeat_ms: u64,

    #[clap(long, default_value = "5000")]
    token_stop_timeout_ms: u64,

    /// Bounds the status patches that write refreshed tokens into policies.
    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            cue_binary,
            cue_timeout_ms,
            http_timeout_ms,
            store_timeout_ms,
            token_heartbeat_ms,
            token_stop_timeout_ms,
            patch_timeout_ms,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Index the policies admission decisions are made against.
        let index = PolicyIndex::shared();

        let overrides = runtime.watch_all::<OverridePolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), overrides)
                .instrument(info_span!("overridepolicies")),
        );

        let cluster_overrides =
            runtime.watch_all::<ClusterOverridePolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), cluster_overrides)
                .instrument(info_span!("clusteroverridepolicies")),
        );

        let cluster_validates =
            runtime.watch_all::<ClusterValidatePolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), cluster_validates)
                .instrument(info_span!("clustervalidatepolicies")),
        );

        let http_timeout = Duration::from_millis(http_timeout_ms);
        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(
            runtime.client(),
            Duration::from_millis(store_timeout_ms),
        ));
        let engine: Arc<dyn Engine> = Arc::new(CueCli::new(
            cue_binary,
            Duration::from_millis(cue_timeout_ms),
        ));
        let compiler = Compiler::new(engine.clone())?;
        let resolver = Resolver::new(store.clone(), http_timeout);

        let tokens = Arc::new(TokenManager::new(token::Config {
            heartbeat: Duration::from_millis(token_heartbeat_ms),
            stop_timeout: Duration::from_millis(token_stop_timeout_ms),
            ..token::Config::default()
        }));
        let credentials = Credentials::new(
            tokens.clone(),
            store,
            http_timeout,
            Duration::from_millis(patch_timeout_ms),
        );

        let mut interrupters = Interrupters::default();
        interrupters.register(
            &gvk_of::<OverridePolicy>(),
            Arc::new(PolicyInterrupter::<OverridePolicySpec>::new(
                compiler.clone(),
                credentials.clone(),
            )),
        );
        interrupters.register(
            &gvk_of::<ClusterOverridePolicy>(),
            Arc::new(PolicyInterrupter::<ClusterOverridePolicySpec>::new(
                compiler.clone(),
                credentials.clone(),
            )),
        );
        interrupters.register(
            &gvk_of::<ClusterValidatePolicy>(),
            Arc::new(PolicyInterrupter::<ClusterValidatePolicySpec>::new(
                compiler,
                credentials,
            )),
        );

        let admission = Admission::new(
            index,
            Arc::new(interrupters),
            OverrideManager::new(OverrideApplier::new(engine.clone(), resolver.clone())),
            ValidateManager::new(ValidateApplier::new(engine, resolver)),
        );
        let runtime = runtime.spawn_server(move || admission);

        // Block the main thread on the shutdown signal. Once it fires, stop the
        // token maintainers before exiting.
        let result = runtime.run().await;
        info!(maintainers = tokens.len(), "Stopping token maintainers");
        if let Err(error) = tokens.stop().await {
            warn!(%error, "Failed to stop token maintainers");
        }
        if result.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
