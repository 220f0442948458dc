//! A pure function from a validated [`Query`] to a [`PipelinePlan`].
//! Never mutates the query — it always indexes into `query.files` rather
//! than draining it.

use std::path::Path;

use gateway_types::{Format, PipelinePlan, Query, QueryValidationError, Stage};

/// The command names the builder invokes. Configurable (rather than
/// hardcoded absolute paths) so tests can substitute `cat`/`sh` fixtures
/// for the real alignment toolkit/duplicate-marker/variant-caller.
#[derive(Debug, Clone)]
pub struct ToolNames {
    pub alignment_toolkit: String,
    pub duplicate_marker: String,
    pub variant_caller: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            alignment_toolkit: "samtools".into(),
            duplicate_marker: "bammarkduplicates2".into(),
            variant_caller: "bcftools".into(),
        }
    }
}

/// Validates a query before planning. Pure and side-effect free: non-empty
/// files, a consistent format across files, reference present when VCF is
/// requested.
pub fn validate(query: &Query) -> Result<(), QueryValidationError> {
    if query.files.is_empty() {
        return Err(QueryValidationError::NoFiles);
    }
    if query.is_multi_file() {
        let first_is_cram = is_cram(&query.files[0].data_object);
        if query
            .files
            .iter()
            .any(|f| is_cram(&f.data_object) != first_is_cram)
        {
            return Err(QueryValidationError::InconsistentFormat);
        }
    }
    if matches!(query.format, Format::Vcf) && query.reference.is_none() {
        return Err(QueryValidationError::MissingReference);
    }
    Ok(())
}

fn is_cram(data_object: &str) -> bool {
    data_object.to_ascii_lowercase().ends_with(".cram")
}

fn output_flag(format: Format) -> Option<&'static str> {
    match format {
        Format::Bam | Format::Vcf => Some("-b"),
        Format::Cram => Some("-C"),
        Format::Sam => None,
    }
}

/// Builds the ordered subprocess plan for an already-[`validate`]d query.
/// `merge_cwd` must be `Some` for multi-file queries (the Request
/// Processor creates this per-request temp directory before calling in);
/// it is ignored for single-file queries.
pub fn build_plan(
    query: &Query,
    tools: &ToolNames,
    merge_cwd: Option<&Path>,
) -> Result<PipelinePlan, QueryValidationError> {
    validate(query)?;

    if query.is_multi_file() {
        build_multi_file_plan(query, tools, merge_cwd.expect("merge_cwd required for multi-file plans"))
    } else {
        build_single_file_plan(query, tools)
    }
}

fn build_single_file_plan(
    query: &Query,
    tools: &ToolNames,
) -> Result<PipelinePlan, QueryValidationError> {
    let mut argv = vec!["view".to_string(), "-h".to_string()];
    if let Some(flag) = output_flag(query.format) {
        argv.push(flag.to_string());
    }
    let path = query
        .files
        .first()
        .map(|f| f.path.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string());
    argv.push(path);
    argv.extend(query.regions.iter().cloned());

    let mut stages = vec![Stage::new("alignment-view", tools.alignment_toolkit.clone(), argv)];

    if matches!(query.format, Format::Vcf) {
        let reference = query
            .reference
            .as_ref()
            .ok_or(QueryValidationError::MissingReference)?;
        let mut argv = vec![
            "-c".to_string(),
            "-f".to_string(),
            reference.to_string_lossy().into_owned(),
        ];
        if let Some(region) = query.single_region() {
            argv.push("-r".to_string());
            argv.push(region.to_string());
        }
        stages.push(Stage::new("varcall", tools.variant_caller.clone(), argv));
    }

    Ok(PipelinePlan::new(stages))
}

fn build_multi_file_plan(
    query: &Query,
    tools: &ToolNames,
    merge_cwd: &Path,
) -> Result<PipelinePlan, QueryValidationError> {
    let mut merge_argv = vec!["merge".to_string(), "-u".to_string()];
    for region in &query.regions {
        merge_argv.push("-R".to_string());
        merge_argv.push(region.clone());
    }
    merge_argv.push("-".to_string());
    for file in &query.files {
        merge_argv.push(file.path.to_string_lossy().into_owned());
    }
    let merge = Stage::new("merge", tools.alignment_toolkit.clone(), merge_argv).with_cwd(merge_cwd.to_path_buf());

    let markdup_tmp = merge_cwd.join("markdup.tmp");
    let markdup = Stage::new(
        "markdup",
        tools.duplicate_marker.clone(),
        vec![
            "level=0".to_string(),
            "verbose=0".to_string(),
            "resetdupflag=1".to_string(),
            format!("tmpfile={}", markdup_tmp.display()),
            "M=/dev/null".to_string(),
        ],
    );

    let mut view_argv = vec!["view".to_string(), "-h".to_string()];
    if let Some(flag) = output_flag(query.format) {
        view_argv.push(flag.to_string());
    }
    let view = Stage::new("alignment-view", tools.alignment_toolkit.clone(), view_argv);

    let mut stages = vec![merge, markdup, view];

    if matches!(query.format, Format::Vcf) {
        let reference = query
            .reference
            .as_ref()
            .ok_or(QueryValidationError::MissingReference)?;
        let mut argv = vec![
            "-c".to_string(),
            "-f".to_string(),
            reference.to_string_lossy().into_owned(),
        ];
        if let Some(region) = query.single_region() {
            argv.push("-r".to_string());
            argv.push(region.to_string());
        }
        stages.push(Stage::new("varcall", tools.variant_caller.clone(), argv));
    }

    Ok(PipelinePlan::new(stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::FileRef;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn file(name: &str) -> FileRef {
        FileRef::new(name, format!("/data/{name}"))
    }

    #[test]
    fn single_file_bam_is_one_stage() {
        let q = Query::new(vec![file("a.bam")]);
        let plan = build_plan(&q, &ToolNames::default(), None).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.stages[0].argv, vec!["view", "-h", "-b", "/data/a.bam"]);
    }

    #[test]
    fn single_file_sam_has_no_output_flag() {
        let q = Query::new(vec![file("a.bam")]).with_format(Format::Sam);
        let plan = build_plan(&q, &ToolNames::default(), None).unwrap();
        assert_eq!(plan.stages[0].argv, vec!["view", "-h", "/data/a.bam"]);
    }

    #[test]
    fn single_file_with_regions_appends_positional_tokens() {
        let q = Query::new(vec![file("a.bam")]).with_regions(vec!["chr1".into(), "chr2:1-100".into()]);
        let plan = build_plan(&q, &ToolNames::default(), None).unwrap();
        assert_eq!(
            plan.stages[0].argv,
            vec!["view", "-h", "-b", "/data/a.bam", "chr1", "chr2:1-100"]
        );
    }

    #[test]
    fn vcf_without_reference_fails() {
        let q = Query::new(vec![file("a.bam")]).with_format(Format::Vcf);
        let err = build_plan(&q, &ToolNames::default(), None).unwrap_err();
        assert_eq!(err, QueryValidationError::MissingReference);
    }

    #[test]
    fn vcf_appends_varcall_stage_with_region() {
        let q = Query::new(vec![file("a.bam")])
            .with_format(Format::Vcf)
            .with_reference(PathBuf::from("/ref/hs37d5.fa"))
            .with_regions(vec!["chr1".into()]);
        let plan = build_plan(&q, &ToolNames::default(), None).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.stages[1].title, "varcall");
        assert_eq!(
            plan.stages[1].argv,
            vec!["-c", "-f", "/ref/hs37d5.fa", "-r", "chr1"]
        );
    }

    #[test]
    fn multi_file_requires_merge_cwd() {
        let q = Query::new(vec![file("a.bam"), file("b.bam")]);
        let tmp = tempfile::tempdir().unwrap();
        let plan = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.stages[0].title, "merge");
        assert_eq!(plan.stages[0].cwd.as_deref(), Some(tmp.path()));
        assert_eq!(plan.stages[1].title, "markdup");
        assert_eq!(plan.stages[2].title, "alignment-view");
    }

    #[test]
    fn multi_file_vcf_has_four_stages() {
        let q = Query::new(vec![file("a.bam"), file("b.bam")])
            .with_format(Format::Vcf)
            .with_reference(PathBuf::from("/ref/hs37d5.fa"));
        let tmp = tempfile::tempdir().unwrap();
        let plan = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.stages[3].title, "varcall");
        assert_eq!(plan.stages[3].argv, vec!["-c", "-f", "/ref/hs37d5.fa"]);
    }

    #[test]
    fn multi_file_vcf_with_single_region_appends_region_flag() {
        let q = Query::new(vec![file("a.bam"), file("b.bam")])
            .with_format(Format::Vcf)
            .with_reference(PathBuf::from("/ref/hs37d5.fa"))
            .with_regions(vec!["chr1".into()]);
        let tmp = tempfile::tempdir().unwrap();
        let plan = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap();
        assert_eq!(plan.stages[3].title, "varcall");
        assert_eq!(
            plan.stages[3].argv,
            vec!["-c", "-f", "/ref/hs37d5.fa", "-r", "chr1"]
        );
    }

    #[test]
    fn mixed_bam_and_cram_is_rejected() {
        let q = Query::new(vec![file("a.bam"), file("b.cram")]);
        let tmp = tempfile::tempdir().unwrap();
        let err = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap_err();
        assert_eq!(err, QueryValidationError::InconsistentFormat);
    }

    #[test]
    fn no_files_is_rejected() {
        let q = Query::new(vec![]);
        let err = build_plan(&q, &ToolNames::default(), None).unwrap_err();
        assert_eq!(err, QueryValidationError::NoFiles);
    }

    #[test]
    fn build_plan_never_mutates_the_query() {
        let q = Query::new(vec![file("a.bam"), file("b.bam")]);
        let before = q.files.len();
        let tmp = tempfile::tempdir().unwrap();
        let _ = build_plan(&q, &ToolNames::default(), Some(tmp.path()));
        assert_eq!(q.files.len(), before);
    }

    proptest::proptest! {
        /// However many files a single-format, non-VCF query names, the
        /// plan's stage count only ever depends on whether it's a merge
        /// (>= 2 files) — never on the exact count past that threshold.
        #[test]
        fn single_vs_multi_file_stage_count_is_binary(n in 1usize..8) {
            let files: Vec<_> = (0..n).map(|i| file(&format!("f{i}.bam"))).collect();
            let q = Query::new(files);
            let tmp = tempfile::tempdir().unwrap();
            let plan = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap();
            if n == 1 {
                prop_assert_eq!(plan.len(), 1);
            } else {
                prop_assert_eq!(plan.len(), 3);
            }
        }

        /// The merge stage's argv always carries exactly one `-R` pair per
        /// region, regardless of how many regions or files are given.
        #[test]
        fn merge_argv_region_flag_count_matches_region_count(
            n_files in 2usize..5,
            n_regions in 0usize..4,
        ) {
            let files: Vec<_> = (0..n_files).map(|i| file(&format!("f{i}.bam"))).collect();
            let regions: Vec<String> = (0..n_regions).map(|i| format!("chr{i}")).collect();
            let q = Query::new(files).with_regions(regions.clone());
            let tmp = tempfile::tempdir().unwrap();
            let plan = build_plan(&q, &ToolNames::default(), Some(tmp.path())).unwrap();
            let flag_count = plan.stages[0].argv.iter().filter(|a| *a == "-R").count();
            prop_assert_eq!(flag_count, n_regions);
        }
    }
}
