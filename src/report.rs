use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Location, LogicalLocation, Message, MultiformatMessageString,
    PhysicalLocation, ReportingDescriptor, Result as SarifResult, ResultLevel,
};

use crate::fault::VerifyOutcome;

/// Metadata describing one verification outcome kind.
struct RuleMetadata {
    id: &'static str,
    name: &'static str,
    description: &'static str,
}

const RULES: [RuleMetadata; 3] = [
    RuleMetadata {
        id: "CLASS_FORMAT_ERROR",
        name: "Class format error",
        description: "Class file is malformed in a way only noticed while verifying its code.",
    },
    RuleMetadata {
        id: "OUT_OF_MEMORY",
        name: "Verifier out of memory",
        description: "Verification exceeded the per-method memory budget.",
    },
    RuleMetadata {
        id: "VERIFY_ERROR",
        name: "Bytecode verification failure",
        description: "Method bytecode violates the type-safety rules of the JVM.",
    },
];

/// Verdict for one input class, tied to the artifact it was read from.
#[derive(Clone, Debug)]
pub(crate) struct ClassVerdict {
    pub(crate) class_name: String,
    pub(crate) artifact_index: i64,
    pub(crate) outcome: VerifyOutcome,
}

pub(crate) fn rule_descriptors() -> Vec<ReportingDescriptor> {
    RULES
        .iter()
        .map(|metadata| {
            ReportingDescriptor::builder()
                .id(metadata.id)
                .name(metadata.name)
                .short_description(
                    MultiformatMessageString::builder()
                        .text(metadata.description)
                        .build(),
                )
                .build()
        })
        .collect()
}

/// One SARIF result per failed class, sorted by rule id and message.
pub(crate) fn verdict_results(verdicts: &[ClassVerdict], artifacts: &[Artifact]) -> Vec<SarifResult> {
    let mut results: Vec<SarifResult> = verdicts
        .iter()
        .filter_map(|verdict| {
            let rule_id = verdict.outcome.rule_id()?;
            let text = match verdict.outcome.message() {
                Some(message) => message.to_string(),
                None => format!("(class: {}) {}", verdict.class_name, verdict.outcome),
            };
            let uri = artifact_uri(artifacts, verdict.artifact_index);
            Some(
                SarifResult::builder()
                    .rule_id(rule_id)
                    .level(ResultLevel::Error)
                    .message(Message::builder().text(text).build())
                    .locations(vec![class_location(&verdict.class_name, uri)])
                    .build(),
            )
        })
        .collect();
    results.sort_by(|left, right| {
        let left_id = left.rule_id.as_deref().unwrap_or("");
        let right_id = right.rule_id.as_deref().unwrap_or("");
        let left_msg = left.message.text.as_deref().unwrap_or("");
        let right_msg = right.message.text.as_deref().unwrap_or("");
        left_id.cmp(right_id).then(left_msg.cmp(right_msg))
    });
    results
}

fn artifact_uri(artifacts: &[Artifact], index: i64) -> Option<&str> {
    let artifact = artifacts.get(usize::try_from(index).ok()?)?;
    artifact.location.as_ref()?.uri.as_deref()
}

fn class_location(class_name: &str, artifact_uri: Option<&str>) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    match artifact_uri {
        Some(uri) => {
            let physical = PhysicalLocation::builder()
                .artifact_location(ArtifactLocation::builder().uri(uri.to_string()).build())
                .build();
            Location::builder()
                .logical_locations(vec![logical])
                .physical_location(physical)
                .build()
        }
        None => Location::builder().logical_locations(vec![logical]).build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(name: &str, outcome: VerifyOutcome) -> ClassVerdict {
        ClassVerdict {
            class_name: name.to_string(),
            artifact_index: 0,
            outcome,
        }
    }

    fn artifact(uri: &str) -> Artifact {
        Artifact::builder()
            .location(ArtifactLocation::builder().uri(uri.to_string()).build())
            .build()
    }

    #[test]
    fn rules_cover_every_failure_kind() {
        let ids: Vec<String> = rule_descriptors()
            .into_iter()
            .map(|rule| rule.id)
            .collect();
        assert_eq!(ids, ["CLASS_FORMAT_ERROR", "OUT_OF_MEMORY", "VERIFY_ERROR"]);
        for outcome in [
            VerifyOutcome::VerifyError(String::new()),
            VerifyOutcome::OutOfMemory,
            VerifyOutcome::ClassFormatError(String::new()),
        ] {
            let id = outcome.rule_id().expect("rule id");
            assert!(ids.iter().any(|known| known == id));
        }
    }

    #[test]
    fn passing_classes_produce_no_results() {
        let results = verdict_results(&[verdict("p/Ok", VerifyOutcome::Ok)], &[]);
        assert!(results.is_empty());
    }

    #[test]
    fn failures_are_sorted_and_located() {
        let verdicts = [
            verdict(
                "p/B",
                VerifyOutcome::VerifyError("(class: p/B) Illegal use of nonvirtual function call".into()),
            ),
            verdict("p/A", VerifyOutcome::OutOfMemory),
            verdict(
                "p/C",
                VerifyOutcome::ClassFormatError("(class: p/C) Illegal exception table range".into()),
            ),
        ];
        let results = verdict_results(&verdicts, &[artifact("file:///tmp/app.jar")]);
        let value = serde_json::to_value(&results).expect("serialize results");

        assert_eq!(value[0]["ruleId"], "CLASS_FORMAT_ERROR");
        assert_eq!(value[1]["ruleId"], "OUT_OF_MEMORY");
        assert_eq!(value[1]["message"]["text"], "(class: p/A) OutOfMemoryError");
        assert_eq!(value[2]["ruleId"], "VERIFY_ERROR");
        assert_eq!(value[2]["level"], "error");
        assert_eq!(
            value[2]["locations"][0]["logicalLocations"][0]["name"],
            "p/B"
        );
        assert_eq!(
            value[2]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "file:///tmp/app.jar"
        );
    }

    #[test]
    fn unknown_artifact_leaves_only_the_logical_location() {
        let mut failed = verdict("p/A", VerifyOutcome::OutOfMemory);
        failed.artifact_index = -1;
        let results = verdict_results(&[failed], &[]);
        let value = serde_json::to_value(&results).expect("serialize results");
        assert!(value[0]["locations"][0].get("physicalLocation").is_none());
    }
}
