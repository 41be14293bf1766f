//! Parameter declarations.
//!
//! A [`ParameterSchema`] is the full external contract of a pipeline: the
//! ordered list of inputs a caller may supply. It is built once, validated,
//! and then passed by reference to whatever needs it; nothing here is global.

use crate::value::ParamValue;
use crate::ParamError;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashSet;
use strum_macros::{Display, EnumString};

/// Semantic type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A single input file.
    File,
    /// A directory.
    Dir,
    /// Free text.
    String,
    /// An integer.
    Int,
    /// A presence switch.
    Bool,
}

/// Whether a caller must provide a value.
///
/// This is declared explicitly rather than inferred from the default: a
/// missing default on a required parameter and a missing default on an
/// optional one mean different things.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    /// The run cannot start without a value.
    Required,
    /// The parameter may be left unset, in which case no flag is emitted.
    Optional,
}

/// One declared pipeline input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    /// Stable key; also the runner flag name (`--<name>`).
    pub name: String,
    /// Semantic type.
    pub kind: ParamKind,
    /// Required or optional.
    pub requirement: Requirement,
    /// Value used when the caller supplies none.
    pub default: Option<ParamValue>,
    /// Heading this parameter starts, if any. Display only.
    pub section_title: Option<String>,
    /// Help text. Display only.
    pub description: String,
    /// Marks a directory the pipeline writes its results into.
    pub output: bool,
}

impl ParameterSpec {
    fn new(name: &str, kind: ParamKind, requirement: Requirement) -> Self {
        ParameterSpec {
            name: name.to_string(),
            kind,
            requirement,
            default: None,
            section_title: None,
            description: String::new(),
            output: false,
        }
    }

    /// Declare a parameter the caller must supply.
    pub fn required(name: &str, kind: ParamKind) -> Self {
        Self::new(name, kind, Requirement::Required)
    }

    /// Declare a parameter the caller may leave unset.
    pub fn optional(name: &str, kind: ParamKind) -> Self {
        Self::new(name, kind, Requirement::Optional)
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Start a new display section at this parameter.
    pub fn section(mut self, title: &str) -> Self {
        self.section_title = Some(title.to_string());
        self
    }

    /// Set the help text.
    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// Mark this parameter as an output location.
    pub fn as_output(mut self) -> Self {
        self.output = true;
        self
    }

    /// True if the parameter may be left unset.
    pub fn is_optional(&self) -> bool {
        self.requirement == Requirement::Optional
    }

    /// The runner flag for this parameter.
    pub fn flag(&self) -> String {
        format!("--{}", self.name)
    }

    /// Parse a raw string into a value of this parameter's kind.
    pub fn parse_value(&self, raw: &str) -> Result<ParamValue, ParamError> {
        ParamValue::parse(self.kind, raw).map_err(|reason| ParamError::InvalidValue {
            name: self.name.clone(),
            kind: self.kind,
            reason,
        })
    }

    /// Check that `value` has the declared kind.
    pub fn check_kind(&self, value: &ParamValue) -> Result<(), ParamError> {
        if value.kind() == self.kind {
            Ok(())
        } else {
            Err(ParamError::KindMismatch {
                name: self.name.clone(),
                expected: self.kind,
                found: value.kind(),
            })
        }
    }
}

/// Ordered, validated set of parameter declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    params: Vec<ParameterSpec>,
}

impl ParameterSchema {
    /// Build a schema, rejecting duplicate names and defaults whose kind does
    /// not match their declaration.
    pub fn new(params: Vec<ParameterSpec>) -> Result<Self, ParamError> {
        let mut seen = HashSet::new();
        for p in &params {
            if !seen.insert(p.name.as_str()) {
                return Err(ParamError::Duplicate(p.name.clone()));
            }
            if let Some(default) = &p.default {
                p.check_kind(default)?;
            }
        }
        Ok(ParameterSchema { params })
    }

    /// Declarations in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter()
    }

    /// Look up a declaration by name.
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Number of declared parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Declarations paired with the heading they display under. A section
    /// title carries forward until the next parameter that sets one.
    pub fn with_sections(&self) -> Vec<(Option<&str>, &ParameterSpec)> {
        let mut current = None;
        self.params
            .iter()
            .map(|p| {
                if let Some(title) = &p.section_title {
                    current = Some(title.as_str());
                }
                (current, p)
            })
            .collect()
    }

    /// Human-readable listing grouped by section.
    pub fn render_table(&self) -> String {
        let width = self.params.iter().map(|p| p.name.len()).max().unwrap_or(0) + 2;
        let mut out = String::new();
        let mut last_section = None;
        for (section, p) in self.with_sections() {
            if section != last_section {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(section.unwrap_or("Options"));
                out.push_str(":\n");
                last_section = section;
            }
            let mut notes = vec![p.kind.to_string(), p.requirement.to_string()];
            if let Some(default) = &p.default {
                notes.push(format!("default: {default}"));
            }
            if p.output {
                notes.push("output".to_string());
            }
            out.push_str(&format!(
                "  --{:<width$}{} [{}]\n",
                p.name,
                p.description,
                notes.iter().join(", "),
            ));
        }
        out
    }
}

/// The nf-core/scnanoseq input surface, in the order the runner is handed
/// its flags.
pub fn scnanoseq() -> Result<ParameterSchema, ParamError> {
    use ParamKind as K;
    use ParameterSpec as P;

    ParameterSchema::new(vec![
        P::required("input", K::File)
            .section("Input/output options")
            .describe("Path to comma-separated file containing information about the samples in the experiment."),
        P::required("outdir", K::Dir)
            .as_output()
            .describe("The output directory where the results will be saved. You have to use absolute paths to storage on Cloud infrastructure."),
        P::optional("email", K::String).describe("Email address for completion summary."),
        P::optional("multiqc_title", K::String)
            .describe("MultiQC report title. Printed as page header, used for filename if not otherwise specified."),
        P::optional("genome", K::String)
            .section("Reference genome options")
            .describe("Name of iGenomes reference."),
        P::required("fasta", K::File).describe("Path to FASTA genome file."),
        P::required("gtf", K::File).describe("Path to GTF file."),
        P::optional("split_amount", K::Int)
            .with_default(0i64)
            .section("Fastq options")
            .describe("The amount of lines to split  the fastq into (Default: 0)"),
        P::optional("min_length", K::Int)
            .with_default(500i64)
            .section("Read trimming options")
            .describe("Choose minimum read length."),
        P::optional("min_q_score", K::Int)
            .with_default(10i64)
            .describe("Choose minimum average read quality score."),
        P::optional("skip_trimming", K::Bool).describe("Skip quality trimming step."),
        P::optional("whitelist", K::File)
            .section("Cell barcode options")
            .describe("The file containing a list of barcodes."),
        P::required("barcode_format", K::String).describe("Specify the format for the barcode+umi"),
        P::optional("stranded", K::String)
            .section("Mapping")
            .describe("Library strandness option."),
        P::optional("kmer_size", K::Int)
            .with_default(14i64)
            .describe("Minimizer k-mer length."),
        P::optional("save_secondary_alignment", K::Bool).describe("Save secondary alignment outputs."),
        P::optional("analyze_uncorrected_bam", K::Bool)
            .section("Analysis options")
            .describe("Run downstream steps on the bam that contains reads that could not be corrected. Do not use this if no whitelist is provided."),
        P::required("counts_level", K::String)
            .describe("What level to generate the counts matrix at. Options: 'gene', 'transcript'."),
        P::optional("retain_introns", K::Bool)
            .with_default(true)
            .describe("Indicate whether to include introns in the count matrices"),
        P::optional("skip_qc", K::Bool)
            .section("Process skipping options")
            .describe("Skip all QC."),
        P::optional("skip_fastqc", K::Bool).describe("Skip FastQC."),
        P::optional("skip_nanoplot", K::Bool).describe("Skip Nanoplot."),
        P::optional("skip_toulligqc", K::Bool).describe("Skip ToulligQC."),
        P::optional("skip_fastq_nanocomp", K::Bool).describe("Skip NanoComp from FASTQ file(s)."),
        P::optional("skip_bam_nanocomp", K::Bool).describe("Skip NanoComp from BAM file(s)."),
        P::optional("skip_rseqc", K::Bool).describe("Skip RSeQC."),
        P::optional("skip_seurat", K::Bool).describe("Skip Seurat QC."),
        P::optional("skip_save_minimap2_index", K::Bool).describe("Skip saving minimap2 index."),
        P::optional("skip_dedup", K::Bool).describe("Skip umi dedup."),
        P::optional("skip_multiqc", K::Bool).describe("Skip MultiQC."),
        P::optional("multiqc_methods_description", K::String)
            .section("Generic options")
            .describe("Custom MultiQC yaml file containing HTML including a methods description."),
    ])
}
