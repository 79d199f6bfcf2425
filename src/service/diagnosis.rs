use serde::Serialize;
use std::fmt;

/// Diagnostic classes the models are trained on, by label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisClass {
    Healthy,
    Other,
    Pneumonia,
    Emphysema,
    Fibrosis,
    Unknown,
}

/// Human-readable text attached to a classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosisInfo {
    pub details: &'static str,
    pub diagnosis: &'static str,
    pub treatment: &'static str,
}

const HEALTHY: DiagnosisInfo = DiagnosisInfo {
    details: "No radiographic signs of pathology were detected in the analysed regions.",
    diagnosis: "Healthy: the image is consistent with normal lung tissue.",
    treatment: "No treatment required. Continue routine preventive examinations.",
};

const OTHER: DiagnosisInfo = DiagnosisInfo {
    details: "Changes were detected that do not match any of the known pathology classes.",
    diagnosis: "Ambiguous findings: the pattern does not correspond to a specific class.",
    treatment: "Refer for additional imaging and a specialist consultation.",
};

const PNEUMONIA: DiagnosisInfo = DiagnosisInfo {
    details: "Areas of increased density consistent with inflammatory infiltration were detected.",
    diagnosis: "Signs of pneumonia.",
    treatment: "Clinical assessment, laboratory tests and antimicrobial therapy as prescribed by a physician.",
};

const EMPHYSEMA: DiagnosisInfo = DiagnosisInfo {
    details: "Areas of increased transparency and hyperinflation of lung tissue were detected.",
    diagnosis: "Signs of emphysema.",
    treatment: "Pulmonology consultation, spirometry, smoking cessation and bronchodilator therapy if indicated.",
};

const FIBROSIS: DiagnosisInfo = DiagnosisInfo {
    details: "Reticular changes consistent with fibrotic remodelling of lung tissue were detected.",
    diagnosis: "Signs of pulmonary fibrosis.",
    treatment: "Pulmonology consultation, high-resolution CT and follow-up of lung function.",
};

const UNKNOWN: DiagnosisInfo = DiagnosisInfo {
    details: "Something went wrong.",
    diagnosis: "The diagnosis could not be determined; the result is unknown.",
    treatment: "Repeat the analysis.",
};

impl DiagnosisClass {
    pub const KNOWN: [DiagnosisClass; 5] = [
        DiagnosisClass::Healthy,
        DiagnosisClass::Other,
        DiagnosisClass::Pneumonia,
        DiagnosisClass::Emphysema,
        DiagnosisClass::Fibrosis,
    ];

    /// Out-of-range labels map to `Unknown`
    pub fn from_label(label: i32) -> Self {
        usize::try_from(label)
            .ok()
            .and_then(|i| Self::KNOWN.get(i).copied())
            .unwrap_or(DiagnosisClass::Unknown)
    }

    pub fn label(&self) -> Option<i32> {
        Self::KNOWN.iter().position(|c| c == self).map(|i| i as i32)
    }

    pub fn info(&self) -> &'static DiagnosisInfo {
        match self {
            DiagnosisClass::Healthy => &HEALTHY,
            DiagnosisClass::Other => &OTHER,
            DiagnosisClass::Pneumonia => &PNEUMONIA,
            DiagnosisClass::Emphysema => &EMPHYSEMA,
            DiagnosisClass::Fibrosis => &FIBROSIS,
            DiagnosisClass::Unknown => &UNKNOWN,
        }
    }
}

impl fmt::Display for DiagnosisClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosisClass::Healthy => "healthy",
            DiagnosisClass::Other => "other",
            DiagnosisClass::Pneumonia => "pneumonia",
            DiagnosisClass::Emphysema => "emphysema",
            DiagnosisClass::Fibrosis => "fibrosis",
            DiagnosisClass::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Text for a predicted label
pub fn diagnosis_for(label: i32) -> &'static DiagnosisInfo {
    DiagnosisClass::from_label(label).info()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_map_in_order() {
        assert_eq!(DiagnosisClass::from_label(0), DiagnosisClass::Healthy);
        assert_eq!(DiagnosisClass::from_label(2), DiagnosisClass::Pneumonia);
        assert_eq!(DiagnosisClass::from_label(4), DiagnosisClass::Fibrosis);
        assert_eq!(DiagnosisClass::Emphysema.label(), Some(3));
    }

    #[test]
    fn test_out_of_range_is_unknown() {
        assert_eq!(DiagnosisClass::from_label(5), DiagnosisClass::Unknown);
        assert_eq!(DiagnosisClass::from_label(-1), DiagnosisClass::Unknown);
        assert_eq!(DiagnosisClass::Unknown.label(), None);
        assert_eq!(diagnosis_for(99), DiagnosisClass::Unknown.info());
    }
}
