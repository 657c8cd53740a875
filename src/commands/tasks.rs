use serde::Serialize;

use deckhand::task::{TaskInfo, CATALOG};

use super::CmdResult;

#[derive(Serialize)]
pub struct TasksOutput {
    pub tasks: Vec<TaskInfo>,
}

pub fn run_json(_: ()) -> CmdResult<TasksOutput> {
    Ok((
        TasksOutput {
            tasks: CATALOG.to_vec(),
        },
        0,
    ))
}
