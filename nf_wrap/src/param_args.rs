//! Command-line arguments generated from a parameter schema.

use clap::{Arg, ArgAction, ArgMatches};
use nf_types::{ParamError, ParamKind, ParameterSchema, ParameterValues};

fn value_name(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::File | ParamKind::Dir => "PATH",
        ParamKind::String => "TEXT",
        ParamKind::Int => "NUM",
        ParamKind::Bool => "true|false",
    }
}

/// One `--<name>` argument per declared parameter, grouped under the
/// parameter's section in `--help`.
///
/// Nothing is marked required here; that is decided when the values are
/// resolved against the schema, so defaults and explicit unsets behave the
/// same whether they come from the command line or elsewhere.
pub fn schema_args(schema: &ParameterSchema) -> Vec<Arg> {
    schema
        .with_sections()
        .into_iter()
        .map(|(section, spec)| {
            let mut arg = Arg::new(spec.name.clone())
                .long(spec.name.clone())
                .value_name(value_name(spec.kind))
                .action(ArgAction::Set)
                .help(spec.description.clone());
            if spec.kind == ParamKind::Bool {
                // `--skip_qc` alone means true; `--retain_introns=false`
                // overrides a true default.
                arg = arg.num_args(0..=1).default_missing_value("true");
            }
            if let Some(section) = section {
                arg = arg.help_heading(section.to_string());
            }
            arg
        })
        .collect()
}

/// Collect the values given for `schema`'s arguments, parsed by kind.
pub fn values_from_matches(
    schema: &ParameterSchema,
    matches: &ArgMatches,
) -> Result<ParameterValues, ParamError> {
    let mut values = ParameterValues::new();
    for spec in schema.iter() {
        if let Some(raw) = matches.try_get_one::<String>(&spec.name).ok().flatten() {
            values.set(&spec.name, spec.parse_value(raw)?);
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use clap::Command;
    use nf_types::schema::scnanoseq;
    use nf_types::{DataPath, ParamValue};

    fn command(schema: &ParameterSchema) -> Command {
        Command::new("nf-scnanoseq").args(schema_args(schema))
    }

    #[test]
    fn test_values_from_args() -> Result<()> {
        let schema = scnanoseq()?;
        let matches = command(&schema).try_get_matches_from([
            "nf-scnanoseq",
            "--input",
            "s3://bucket/samplesheet.csv",
            "--min_length",
            "300",
            "--skip_qc",
            "--retain_introns=false",
            "--barcode_format",
            "10X_3v3",
        ])?;
        let values = values_from_matches(&schema, &matches)?;

        assert_eq!(values.len(), 5);
        assert_eq!(
            values.get("input"),
            Some(Some(&ParamValue::File(DataPath::Remote(
                "s3://bucket/samplesheet.csv".to_string()
            ))))
        );
        assert_eq!(values.get("min_length"), Some(Some(&ParamValue::Int(300))));
        assert_eq!(values.get("skip_qc"), Some(Some(&ParamValue::Bool(true))));
        assert_eq!(
            values.get("retain_introns"),
            Some(Some(&ParamValue::Bool(false)))
        );
        assert_eq!(values.get("genome"), None);
        Ok(())
    }

    #[test]
    fn test_invalid_value() -> Result<()> {
        let schema = scnanoseq()?;
        let matches =
            command(&schema).try_get_matches_from(["nf-scnanoseq", "--kmer_size", "fourteen"])?;
        let err = values_from_matches(&schema, &matches).unwrap_err();
        assert!(matches!(err, ParamError::InvalidValue { ref name, .. } if name == "kmer_size"));
        Ok(())
    }

    #[test]
    fn test_help_headings() -> Result<()> {
        let schema = scnanoseq()?;
        let args = schema_args(&schema);
        assert_eq!(args.len(), schema.len());

        let heading = |name: &str| {
            args.iter()
                .find(|a| a.get_id() == name)
                .and_then(|a| a.get_help_heading().map(ToString::to_string))
        };
        assert_eq!(heading("input").as_deref(), Some("Input/output options"));
        assert_eq!(heading("email").as_deref(), Some("Input/output options"));
        assert_eq!(heading("skip_dedup").as_deref(), Some("Process skipping options"));
        Ok(())
    }
}
