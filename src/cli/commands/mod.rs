pub mod context;
mod create;
mod destroy;
mod etl;
pub mod helpers;
mod init;
mod plan;
mod simulate;
mod status;

pub use create::{execute_create, provision, provision_roles, Provisioned};
pub use destroy::{execute_destroy, teardown};
pub use etl::{execute_etl, run_etl, EtlOutcome};
pub use init::execute_init;
pub use plan::{execute_plan, render_plan};
pub use send_test::{execute_send_test, sample_message};
pub use simulate::{execute_simulate, run_simulation};
pub use status::{collect_status, execute_status, ResourceStatus};
