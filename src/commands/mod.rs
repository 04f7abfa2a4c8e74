pub type CmdResult<T> = afpipe::Result<(T, i32)>;

pub mod compile;
pub mod pipelines;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        afpipe::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (afpipe::Result<serde_json::Value>, i32) {
    crate::tty::status("afpipe is working...");

    match command {
        crate::Commands::Compile(args) => dispatch!(args, compile),
        crate::Commands::Pipelines(args) => dispatch!(args, pipelines),
    }
}
