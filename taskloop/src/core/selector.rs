//! Plan cursor: which task runs next.

/// Where the plan cursor points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTask<'a> {
    /// No plan yet; executing must bootstrap planning first.
    Unplanned,
    /// The task at `index` is next.
    Ready { index: usize, task: &'a str },
    /// Every task in the plan has a recorded result.
    Exhausted,
}

/// Select the next task. The number of completed results is the cursor, so
/// tasks run strictly in plan order and are never skipped.
pub fn next_task(plan: &[String], completed: usize) -> NextTask<'_> {
    if plan.is_empty() {
        return NextTask::Unplanned;
    }
    match plan.get(completed) {
        Some(task) => NextTask::Ready {
            index: completed,
            task,
        },
        None => NextTask::Exhausted,
    }
}

/// Tasks after `index`, used as executor context.
pub fn remaining_after(plan: &[String], index: usize) -> &[String] {
    plan.get(index + 1..).unwrap_or(&[])
}
