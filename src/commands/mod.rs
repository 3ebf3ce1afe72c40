mod apply;
mod destroy;
mod init;
mod output;
mod plan;
mod validate;

pub use apply::ApplyCommand;
pub use destroy::DestroyCommand;
pub use init::InitCommand;
pub use output::OutputCommand;
pub use plan::PlanCommand;
pub use validate::ValidateCommand;
