//! Insurance domain profiles.
//!
//! The insurance type is resolved once, when the job is created, into an
//! [`InsuranceProfile`]. Every stage then asks the profile for what differs
//! between lines of business (classification labels, extraction focus, the
//! analysis narrative, action rules, chat calculators) instead of
//! re-checking a string tag.

use crate::error::UnderwriteError;
use crate::output::DomainSectionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Classification label used when nothing else fits.
pub const OTHER_LABEL: &str = "OTHER";

/// One classification label and the visual cues that identify it.
#[derive(Debug, Clone, Copy)]
pub struct DocumentType {
    pub label: &'static str,
    pub traits: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceProfile {
    Life,
    #[default]
    PropertyCasualty,
}

impl InsuranceProfile {
    /// Resolve the optional `insuranceType` request field.
    ///
    /// Absent or blank selects the default (property & casualty); anything
    /// other than the two wire names is a validation error.
    pub fn resolve(value: Option<&str>) -> Result<Self, UnderwriteError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some("life") => Ok(InsuranceProfile::Life),
            Some("property_casualty") => Ok(InsuranceProfile::PropertyCasualty),
            Some(other) => Err(UnderwriteError::InvalidField {
                field: "insuranceType",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InsuranceProfile::Life => "life",
            InsuranceProfile::PropertyCasualty => "property_casualty",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            InsuranceProfile::Life => "life insurance",
            InsuranceProfile::PropertyCasualty => "property & casualty insurance",
        }
    }

    pub fn document_types(self) -> &'static [DocumentType] {
        match self {
            InsuranceProfile::Life => LIFE_DOCUMENT_TYPES,
            InsuranceProfile::PropertyCasualty => PC_DOCUMENT_TYPES,
        }
    }

    /// Map a model-supplied label onto the profile's label set.
    ///
    /// Matching ignores case and surrounding whitespace; a label outside
    /// the set becomes [`OTHER_LABEL`].
    pub fn normalise_label(self, raw: &str) -> &'static str {
        let wanted = raw.trim().replace([' ', '-'], "_").to_ascii_uppercase();
        match self
            .document_types()
            .iter()
            .find(|t| t.label == wanted)
        {
            Some(t) => t.label,
            None => {
                warn!(label = raw, profile = self.as_str(), "Unknown document type, using OTHER");
                OTHER_LABEL
            }
        }
    }

    /// What the extraction prompt tells the model to look for.
    pub fn extraction_focus(self) -> &'static [&'static str] {
        match self {
            InsuranceProfile::Life => &[
                "Health details (medical history, conditions, medications, lab results)",
                "Occupation information",
                "Credit scores",
                "Driving history",
                "Hobbies and avocations",
                "Discrepancies (contradictory or unclear information)",
            ],
            InsuranceProfile::PropertyCasualty => &[
                "Property details (type, location, size, age, construction materials)",
                "Property history (previous damage, renovations, insurance claims)",
                "Property valuation information",
                "Risk factors (proximity to flood zones, fire hazards, etc.)",
                "Security measures (alarms, sprinklers, etc.)",
                "Ownership details",
                "Discrepancies (contradictory or unclear information)",
            ],
        }
    }

    pub fn domain_section(self) -> DomainSectionKind {
        match self {
            InsuranceProfile::Life => DomainSectionKind::MedicalTimeline,
            InsuranceProfile::PropertyCasualty => DomainSectionKind::PropertyAssessment,
        }
    }

    /// Instruction for the profile's narrative section of the analysis.
    pub fn domain_section_instruction(self) -> &'static str {
        match self {
            InsuranceProfile::Life => {
                "Timeline of major medical events ordered by date with page references. \
                 Only include major medical events, not minor ones."
            }
            InsuranceProfile::PropertyCasualty => {
                "Detailed assessment of property characteristics, conditions, and risk factors \
                 with page references. Include analysis of construction, location risks, \
                 security features, and valuation factors."
            }
        }
    }

    /// What the risk assessment should weigh.
    pub fn risk_focus(self) -> &'static str {
        match self {
            InsuranceProfile::Life => "mortality risk factors",
            InsuranceProfile::PropertyCasualty => "property and liability risks",
        }
    }

    /// Strict ineligibility rules the action agent checks first.
    pub fn ineligibility_rules(self) -> &'static [&'static str] {
        match self {
            InsuranceProfile::Life => &[
                "For application type \"LIFE_INSURANCE_APPLICATION\": if the applicant's age at \
                 application is under 18 or over 85, it is INELIGIBLE. State 'applicant age outside \
                 insurable range' as the reason.",
                "For application type \"LIFE_INSURANCE_APPLICATION\": if the application is unsigned \
                 by the proposed insured, it is INELIGIBLE. State 'application not signed' as the reason.",
                "For any application type: if the applicant's sanctioned-entity status is \"Positive\" \
                 or \"MatchFound\", it is INELIGIBLE. State 'sanctioned entity match' as the reason.",
                "For any application type: if a requested policy start date is provided and it is in \
                 the past, it is INELIGIBLE. State 'past policy start date' as the reason.",
            ],
            InsuranceProfile::PropertyCasualty => &[
                "For application type \"COMMERCIAL_PROPERTY_APPLICATION\": if the business type is \
                 \"Nightclub\" or \"Explosives Manufacturing\", it is INELIGIBLE. State this specific \
                 business type as the reason.",
                "For application type \"COMMERCIAL_PROPERTY_APPLICATION\": if the construction type is \
                 \"Wood Frame\" AND the wildfire risk zone is \"High\" or \"Extreme\", it is INELIGIBLE. \
                 State this combination as the reason.",
                "For any application type: if the applicant's sanctioned-entity status is \"Positive\" \
                 or \"MatchFound\", it is INELIGIBLE. State 'sanctioned entity match' as the reason.",
                "For any application type: if crime report data is available and its property crime \
                 grade is \"F\", it is INELIGIBLE. State 'Property Crime Grade is F' as the reason.",
                "For any application type: if a requested policy start date is provided and it is in \
                 the past, it is INELIGIBLE. State 'past policy start date' as the reason.",
            ],
        }
    }

    /// Supporting documents to request, per application type. The last
    /// entry (`DEFAULT`) applies to any other type.
    pub fn supporting_documents(self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            InsuranceProfile::Life => LIFE_SUPPORTING_DOCUMENTS,
            InsuranceProfile::PropertyCasualty => PC_SUPPORTING_DOCUMENTS,
        }
    }

    /// What the chat assistant specialises in.
    pub fn chat_role(self) -> &'static str {
        match self {
            InsuranceProfile::Life => {
                "You are a senior life insurance underwriter assistant with expertise in medical \
                 underwriting, mortality risk assessment, and health condition evaluation.\n\n\
                 Your primary role is to help analyze life insurance applications, focusing on:\n\
                 - Medical history and health conditions\n\
                 - Medication usage and treatment patterns\n\
                 - Family medical history\n\
                 - Lab results and their implications for mortality risk\n\
                 - Lifestyle factors affecting health (smoking, alcohol, etc.)\n\
                 - Occupation and avocation risks"
            }
            InsuranceProfile::PropertyCasualty => {
                "You are a senior property and casualty insurance underwriter assistant with \
                 expertise in property risk assessment, liability evaluation, and insurance \
                 coverage analysis.\n\n\
                 Your primary role is to help analyze P&C insurance applications, focusing on:\n\
                 - Property characteristics, condition, and valuation\n\
                 - Construction quality and building materials\n\
                 - Geographic and environmental risk factors\n\
                 - Security and safety features\n\
                 - Claims history and loss patterns\n\
                 - Liability exposures\n\n\
                 You have specific knowledge of ACORD forms. When referencing these forms, cite the \
                 specific form number when applicable (e.g., \"According to ACORD 125 on page 3...\")."
            }
        }
    }
}

impl fmt::Display for InsuranceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEFAULT_SUPPORTING_DOCUMENTS: &[&str] = &[
    "Signed and Dated Application",
    "Government-Issued Identification",
    "Prior Insurance Declarations Page",
];

type SupportingDocuments = &'static [(&'static str, &'static [&'static str])];

const LIFE_SUPPORTING_DOCUMENTS: SupportingDocuments = &[
    (
        "LIFE_INSURANCE_APPLICATION",
        &[
            "Attending Physician Statement",
            "Paramedical Exam Report",
            "Blood and Urine Lab Results",
            "Prescription History Report",
            "Proof of Income (for coverage above $1,000,000)",
        ],
    ),
    (
        "MEDICAL_REPORT",
        &[
            "Complete Medical Records (last 5 years)",
            "Specialist Consultation Notes",
            "Current Medication List",
        ],
    ),
    ("DEFAULT", DEFAULT_SUPPORTING_DOCUMENTS),
];

const PC_SUPPORTING_DOCUMENTS: SupportingDocuments = &[
    (
        "COMMERCIAL_PROPERTY_APPLICATION",
        &[
            "Property Inspection Report",
            "5-Year Loss Run History",
            "Statement of Values",
            "Fire Protection and Sprinkler Certification",
            "Building Photographs",
        ],
    ),
    (
        "ACORD_FORM",
        &[
            "Completed ACORD 125 Commercial Insurance Application",
            "ACORD 140 Property Section",
            "5-Year Loss Run History",
        ],
    ),
    ("DEFAULT", DEFAULT_SUPPORTING_DOCUMENTS),
];

const MEDICAL_REPORT: DocumentType = DocumentType {
    label: "MEDICAL_REPORT",
    traits: &[
        "Contains patient information, medical history, diagnosis, or treatment plans",
        "May include letterheads from hospitals, clinics, or doctor's offices",
        "Look for terms like \"Patient Name\", \"Date of Birth\", \"Diagnosis\", \"Symptoms\", \"Medication\"",
    ],
};

const FINANCIAL_STATEMENT: DocumentType = DocumentType {
    label: "FINANCIAL_STATEMENT",
    traits: &[
        "Contains financial data like income, expenses, assets, or liabilities",
        "May include tables with monetary values",
        "Often has terms like \"Balance Sheet\", \"Income Statement\", or \"Cash Flow\"",
    ],
};

const OTHER: DocumentType = DocumentType {
    label: OTHER_LABEL,
    traits: &["Any document that doesn't clearly fit the above categories"],
};

const LIFE_DOCUMENT_TYPES: &[DocumentType] = &[
    DocumentType {
        label: "LIFE_INSURANCE_APPLICATION",
        traits: &[
            "Contains personal information fields like name, address, date of birth",
            "Has sections for health questions, medical history",
            "Often includes beneficiary information and policy details",
        ],
    },
    MEDICAL_REPORT,
    DocumentType {
        label: "ATTENDING_PHYSICIAN_STATEMENT",
        traits: &[
            "A form filled out by a physician about the patient's health",
            "Contains sections labeled \"Attending Physician's Statement\" or \"APS\"",
            "Includes detailed medical evaluations and the physician's signature",
        ],
    },
    DocumentType {
        label: "LAB_REPORT",
        traits: &[
            "Contains test results for blood work, urine analysis, etc.",
            "Has tables or charts of test values with reference ranges",
            "Often has laboratory letterhead or header",
        ],
    },
    DocumentType {
        label: "PRESCRIPTION_HISTORY",
        traits: &[
            "Lists medications prescribed to the individual",
            "Contains prescription dates, dosages, and prescribing physicians",
            "May be in a format from a pharmacy or prescription benefit manager",
        ],
    },
    FINANCIAL_STATEMENT,
    OTHER,
];

const PC_DOCUMENT_TYPES: &[DocumentType] = &[
    DocumentType {
        label: "ACORD_FORM",
        traits: &[
            "Contains the ACORD logo",
            "Has structured form fields for insurance information",
            "Often includes policy numbers, insured details, and coverage information",
        ],
    },
    MEDICAL_REPORT,
    FINANCIAL_STATEMENT,
    DocumentType {
        label: "COMMERCIAL_PROPERTY_APPLICATION",
        traits: &[
            "An application for commercial property insurance",
            "Includes locations, agency information, and coverages requested",
            "Might have a header or footer reading Commercial Property Application",
        ],
    },
    DocumentType {
        label: "CRIME_REPORT",
        traits: &[
            "A report of crime in the area of the property being insured",
            "Mentions property crime statistics for the given zip code",
            "Often has a header or footer reading Crime Report",
        ],
    },
    OTHER,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults_and_rejects_unknown() {
        assert_eq!(
            InsuranceProfile::resolve(None).unwrap(),
            InsuranceProfile::PropertyCasualty
        );
        assert_eq!(
            InsuranceProfile::resolve(Some("  ")).unwrap(),
            InsuranceProfile::PropertyCasualty
        );
        assert_eq!(
            InsuranceProfile::resolve(Some("life")).unwrap(),
            InsuranceProfile::Life
        );
        let err = InsuranceProfile::resolve(Some("marine")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn label_sets_end_with_other() {
        for profile in [InsuranceProfile::Life, InsuranceProfile::PropertyCasualty] {
            let labels: Vec<&str> = profile.document_types().iter().map(|t| t.label).collect();
            assert_eq!(labels.last(), Some(&OTHER_LABEL));
        }
        assert_eq!(InsuranceProfile::Life.document_types().len(), 7);
        assert_eq!(InsuranceProfile::PropertyCasualty.document_types().len(), 6);
    }

    #[test]
    fn normalise_label_is_lenient_then_falls_back() {
        let pc = InsuranceProfile::PropertyCasualty;
        assert_eq!(pc.normalise_label("acord form"), "ACORD_FORM");
        assert_eq!(pc.normalise_label(" CRIME_REPORT "), "CRIME_REPORT");
        // A life-only label is not part of the P&C set.
        assert_eq!(pc.normalise_label("LAB_REPORT"), OTHER_LABEL);
        assert_eq!(
            InsuranceProfile::Life.normalise_label("lab-report"),
            "LAB_REPORT"
        );
    }

    #[test]
    fn domain_section_follows_profile() {
        assert_eq!(
            InsuranceProfile::Life.domain_section().key(),
            "MEDICAL_TIMELINE"
        );
        assert_eq!(
            InsuranceProfile::PropertyCasualty.domain_section().key(),
            "PROPERTY_ASSESSMENT"
        );
    }

    #[test]
    fn supporting_documents_have_default_row() {
        for profile in [InsuranceProfile::Life, InsuranceProfile::PropertyCasualty] {
            let map = profile.supporting_documents();
            assert_eq!(map.last().map(|(k, _)| *k), Some("DEFAULT"));
        }
    }
}
