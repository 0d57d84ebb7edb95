use aggbook::config::Config;
use aggbook::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    aggbook::init();

    let config = Config::from_env();
    let supervisor = match Supervisor::new(&config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "failed to start supervisor");
            std::process::exit(1);
        }
    };

    supervisor
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await;
}
