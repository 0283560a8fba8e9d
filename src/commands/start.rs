//! `tms-deploy start`

use tracing::info;

use tms_deploy::DeployConfig;
use tms_deploy::Result;
use tms_deploy::env::RuntimeEnv;
use tms_deploy::supervisor::Supervisor;

pub async fn execute(config: DeployConfig) -> Result<i32> {
    let env = RuntimeEnv::from_process_env()?;
    info!(
        node_env = %env.node_env,
        port = env.port,
        pid_file = %config.app.pid_file.display(),
        "Starting TMS application"
    );

    let exit = Supervisor::new(config, env).run().await?;
    Ok(exit.exit_code())
}
