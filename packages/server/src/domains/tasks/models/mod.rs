pub mod job_record;
pub mod task_definition;

pub use job_record::{JobRecord, JobStatus};
pub use task_definition::{NewTaskDefinition, TaskDefinition, TaskDefinitionPatch};
