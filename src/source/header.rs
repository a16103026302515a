//! Run header: `#` preamble lines and the legacy `.ini` sidecar

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use super::ini::IniDocument;
use super::{Axis, AxisRole};

/// Header fields gathered from one source
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Header {
    pub title: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub tags: Vec<String>,
    pub axes: Vec<Axis>,
    pub parameters: BTreeMap<String, String>,
}

impl Header {
    /// Parse `#`-prefixed preamble lines (the leading `#` may or may not be stripped)
    pub(crate) fn from_preamble<'a, I>(lines: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut header = Self::default();

        for line in lines {
            let body = line.trim().trim_start_matches('#').trim();
            let Some((key, value)) = body.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "title" => header.title = Some(value.to_string()),
                "created" => header.created = Some(parse_created(value)?),
                "tags" => header.tags.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string),
                ),
                "independent" => header.axes.push(parse_axis(value, AxisRole::Independent)?),
                "dependent" => header.axes.push(parse_axis(value, AxisRole::Dependent)?),
                "parameter" => {
                    let (name, data) = value
                        .split_once('=')
                        .ok_or_else(|| format!("parameter {value:?} is not `name = value`"))?;
                    header
                        .parameters
                        .insert(name.trim().to_string(), data.trim().to_string());
                }
                // free-form comment
                _ => {}
            }
        }

        Ok(header)
    }

    /// Read the data-vault sidecar layout
    ///
    /// `[General]` holds title and creation time; axes come from numbered
    /// `[Independent N]` / `[Dependent N]` sections and parameters from
    /// `[Parameter N]`.
    pub(crate) fn from_sidecar(doc: &IniDocument) -> Result<Self, String> {
        let mut header = Self {
            title: doc.get("General", "title").map(str::to_string),
            created: doc.get("General", "created").map(parse_created).transpose()?,
            ..Self::default()
        };

        for (prefix, count_key, role) in [
            ("Independent", "independent", AxisRole::Independent),
            ("Dependent", "dependent", AxisRole::Dependent),
        ] {
            for section in numbered_sections(doc, prefix, count_key)? {
                let label = section
                    .get("label")
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| format!("[{prefix}] section without a label"))?;
                let name = match section.get("legend").map(|s| s.trim()) {
                    Some(legend) if !legend.is_empty() => format!("{label} ({legend})"),
                    _ => label.to_string(),
                };
                let unit = section
                    .get("units")
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                header.axes.push(Axis { name, role, unit });
            }
        }

        for section in numbered_sections(doc, "Parameter", "parameters")? {
            if let Some(label) = section.get("label") {
                let data = section.get("data").cloned().unwrap_or_default();
                header.parameters.insert(label.trim().to_string(), data);
            }
        }

        Ok(header)
    }

    /// Combine with a sidecar header; sidecar scalars and axes win
    pub(crate) fn merge(mut self, sidecar: Self) -> Self {
        if sidecar.title.is_some() {
            self.title = sidecar.title;
        }
        if sidecar.created.is_some() {
            self.created = sidecar.created;
        }
        if !sidecar.axes.is_empty() {
            self.axes = sidecar.axes;
        }
        self.tags.extend(sidecar.tags);
        self.parameters.extend(sidecar.parameters);
        self
    }
}

/// Sections `"{prefix} 1"`, `"{prefix} 2"`, ...
///
/// Uses the `[General]` count when declared, otherwise probes until the
/// first gap.
fn numbered_sections<'a>(
    doc: &'a IniDocument,
    prefix: &str,
    count_key: &str,
) -> Result<Vec<&'a BTreeMap<String, String>>, String> {
    if let Some(count) = doc.get("General", count_key) {
        let count: usize = count
            .trim()
            .parse()
            .map_err(|_| format!("[General] {count_key} = {count:?} is not a count"))?;
        return (1..=count)
            .map(|i| {
                doc.section(&format!("{prefix} {i}"))
                    .ok_or_else(|| format!("missing section [{prefix} {i}]"))
            })
            .collect();
    }

    Ok((1..)
        .map_while(|i| doc.section(&format!("{prefix} {i}")))
        .collect())
}

/// `name` or `name [unit]`
fn parse_axis(value: &str, role: AxisRole) -> Result<Axis, String> {
    let (name, unit) = match value.strip_suffix(']').and_then(|s| s.rsplit_once('[')) {
        Some((name, unit)) => (name.trim(), Some(unit.trim()).filter(|u| !u.is_empty())),
        None => (value.trim(), None),
    };
    if name.is_empty() {
        return Err(format!("axis declaration {value:?} has no name"));
    }
    Ok(Axis {
        name: name.to_string(),
        role,
        unit: unit.map(str::to_string),
    })
}

/// Parse a creation time; the data vault writes `2023-05-01, 10:00:00`
pub(crate) fn parse_created(value: &str) -> Result<NaiveDateTime, String> {
    let normalized = value.replace(',', " ");
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .ok_or_else(|| format!("unrecognised creation time {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_preamble_fields() {
        let header = Header::from_preamble([
            "# title: T1",
            "# created: 2023-05-01 10:00:00",
            "# tags: x, y",
            "# tags: ,z",
            "# independent: V [V]",
            "# dependent: I",
            "# parameter: freq = 5.1 GHz",
            "# just a remark",
        ])
        .unwrap();

        assert_eq!(header.title.as_deref(), Some("T1"));
        assert_eq!(header.created, Some(at(10, 0, 0)));
        assert_eq!(header.tags, vec!["x", "y", "z"]);
        assert_eq!(
            header.axes,
            vec![
                Axis {
                    name: "V".into(),
                    role: AxisRole::Independent,
                    unit: Some("V".into())
                },
                Axis {
                    name: "I".into(),
                    role: AxisRole::Dependent,
                    unit: None
                },
            ]
        );
        assert_eq!(header.parameters["freq"], "5.1 GHz");
    }

    #[test]
    fn test_created_accepts_data_vault_comma() {
        assert_eq!(parse_created("2023-05-01, 10:11:12").unwrap(), at(10, 11, 12));
        assert_eq!(parse_created("2023-05-01T10:11:12").unwrap(), at(10, 11, 12));
        assert!(parse_created("yesterday").is_err());
    }

    #[test]
    fn test_axis_without_name_rejected() {
        assert!(Header::from_preamble(["# dependent: [A]"]).is_err());
    }

    #[test]
    fn test_sidecar_layout() {
        let doc = IniDocument::parse(
            "[General]\ntitle = Rabi\ncreated = 2023-05-01, 09:30:00\nindependent = 1\ndependent = 2\nparameters = 1\n\n\
             [Independent 1]\nlabel = time\nunits = ns\n\n\
             [Dependent 1]\nlabel = Amplitude\nlegend = q1\nunits = \n\n\
             [Dependent 2]\nlabel = Phase\nunits = rad\n\n\
             [Parameter 1]\nlabel = drive\ndata = 0.25\n",
        )
        .unwrap();

        let header = Header::from_sidecar(&doc).unwrap();

        assert_eq!(header.title.as_deref(), Some("Rabi"));
        assert_eq!(header.created, Some(at(9, 30, 0)));
        let names: Vec<_> = header.axes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["time", "Amplitude (q1)", "Phase"]);
        assert_eq!(header.axes[1].unit, None);
        assert_eq!(header.parameters["drive"], "0.25");
    }

    #[test]
    fn test_sidecar_missing_counted_section() {
        let doc = IniDocument::parse("[General]\ntitle = t\nindependent = 2\n[Independent 1]\nlabel = x\n")
            .unwrap();
        let err = Header::from_sidecar(&doc).unwrap_err();
        assert!(err.contains("Independent 2"));
    }

    #[test]
    fn test_merge_prefers_sidecar() {
        let preamble = Header::from_preamble(["# title: old", "# tags: a", "# independent: x"]).unwrap();
        let sidecar = Header {
            title: Some("new".into()),
            tags: vec!["b".into()],
            ..Header::default()
        };

        let merged = preamble.merge(sidecar);

        assert_eq!(merged.title.as_deref(), Some("new"));
        assert_eq!(merged.tags, vec!["a", "b"]);
        assert_eq!(merged.axes.len(), 1);
    }
}
