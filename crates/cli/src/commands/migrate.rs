use crate::commands::runtime::{block_on, load_config, open_database, Failure};
use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("migrate", error_class, message, exit_code);
        }
    };

    block_on("migrate", async move {
        let pool = open_database(&config).await?;
        pool.close().await;
        Ok::<_, Failure>(CommandResult::success("migrate", "applied pending migrations"))
    })
}
