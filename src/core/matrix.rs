//! Matrix expansion: one job instance per combination of axis values.

use std::collections::HashMap;

use heck::ToKebabCase;
use serde::Serialize;

use crate::workflow::Job;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInstance {
    /// `<job-id>` for matrix-less jobs, `<job-id>--<axis-value-slug>...` otherwise.
    pub instance_id: String,
    pub job_id: String,
    pub matrix: HashMap<String, String>,
}

/// Expand a job's matrix into instances. A job without a matrix yields a
/// single instance with an empty matrix map.
pub fn expand(job: &Job) -> Vec<JobInstance> {
    if job.matrix.is_empty() {
        return vec![JobInstance {
            instance_id: job.id.clone(),
            job_id: job.id.clone(),
            matrix: HashMap::new(),
        }];
    }

    let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for (axis, values) in &job.matrix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((axis.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|combo| {
            let slug: Vec<String> = combo
                .iter()
                .map(|(_, value)| value.to_kebab_case())
                .collect();
            JobInstance {
                instance_id: format!("{}--{}", job.id, slug.join("--")),
                job_id: job.id.clone(),
                matrix: combo.into_iter().collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parse;

    #[test]
    fn no_matrix_yields_single_instance() {
        let wf = parse(
            r#"
name: M
on: [pull_request]
jobs:
  lint:
    runs-on: ubuntu-latest
    steps: [{ run: "true" }]
"#,
            "m.yml",
        )
        .unwrap();
        let instances = expand(&wf.jobs[0]);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].instance_id, "lint");
        assert!(instances[0].matrix.is_empty());
    }

    #[test]
    fn interpreter_matrix_yields_one_instance_per_version() {
        let wf = parse(
            r#"
name: M
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ["3.9", "3.10", "3.11"]
    steps: [{ run: "true" }]
"#,
            "m.yml",
        )
        .unwrap();
        let instances = expand(&wf.jobs[0]);
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].instance_id, "tests--3-9");
        assert_eq!(instances[2].matrix["python-version"], "3.11");
    }

    #[test]
    fn two_axes_expand_to_cartesian_product() {
        let wf = parse(
            r#"
name: M
on: [pull_request]
jobs:
  grid:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        a: ["1", "2"]
        b: ["x", "y", "z"]
    steps: [{ run: "true" }]
"#,
            "m.yml",
        )
        .unwrap();
        let instances = expand(&wf.jobs[0]);
        assert_eq!(instances.len(), 6);
    }
}
