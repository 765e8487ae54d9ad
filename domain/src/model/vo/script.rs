use uuid::Uuid;

use super::request::ResourceRequest;

/// A batch script ready to hand to a scheduler: the resource directives
/// plus the command body launched inside the allocation.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    /// Identifies this submission in the spool directory.
    pub run_id: Uuid,
    /// Path the script is written to, relative to the spool directory.
    pub path: String,
    pub request: ResourceRequest,
    /// Shell line(s) executed inside the allocation.
    pub body: String,
}

impl ScriptSpec {
    pub fn new(request: ResourceRequest, body: impl Into<String>) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            path: format!("{run_id}/job.sh"),
            request,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_scoped_by_run_id() {
        let spec = ScriptSpec::new(ResourceRequest::default(), "python run.py");
        assert_eq!(spec.path, format!("{}/job.sh", spec.run_id));
        assert_eq!(spec.body, "python run.py");
    }
}
