use std::path::PathBuf;

/// An abstract form field, independent of whatever DOM element happens to
/// represent it on the marketplace page today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalField {
    Image,
    Title,
    Price,
    Category,
    Condition,
    Description,
    Availability,
}

impl LogicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalField::Image => "image",
            LogicalField::Title => "title",
            LogicalField::Price => "price",
            LogicalField::Category => "category",
            LogicalField::Condition => "condition",
            LogicalField::Description => "description",
            LogicalField::Availability => "availability",
        }
    }

    /// Fill order is fixed: the image upload goes first because it reflows
    /// the rest of the form, then text fields top to bottom.
    pub fn fill_order() -> [LogicalField; 7] {
        [
            LogicalField::Image,
            LogicalField::Title,
            LogicalField::Price,
            LogicalField::Category,
            LogicalField::Condition,
            LogicalField::Description,
            LogicalField::Availability,
        ]
    }

    pub fn spec(&self) -> FieldSpec {
        match self {
            LogicalField::Image => FieldSpec {
                field: *self,
                label: "Photos",
                synonyms: &["Add photos"],
                kind: ControlKind::FileInput,
            },
            LogicalField::Title => FieldSpec {
                field: *self,
                label: "Title",
                synonyms: &[],
                kind: ControlKind::TextInput,
            },
            LogicalField::Price => FieldSpec {
                field: *self,
                label: "Price",
                synonyms: &[],
                kind: ControlKind::TextInput,
            },
            LogicalField::Category => FieldSpec {
                field: *self,
                label: "Category",
                synonyms: &[],
                kind: ControlKind::Dropdown,
            },
            LogicalField::Condition => FieldSpec {
                field: *self,
                label: "Condition",
                synonyms: &[],
                kind: ControlKind::Dropdown,
            },
            LogicalField::Description => FieldSpec {
                field: *self,
                label: "Description",
                synonyms: &[],
                kind: ControlKind::TextArea,
            },
            LogicalField::Availability => FieldSpec {
                field: *self,
                // The marketplace labels this slot with its default choice.
                label: "Availability",
                synonyms: &["List as in Stock"],
                kind: ControlKind::Dropdown,
            },
        }
    }
}

impl std::fmt::Display for LogicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    TextInput,
    TextArea,
    Dropdown,
    FileInput,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field: LogicalField,
    /// Visible label the marketplace renders next to the control.
    pub label: &'static str,
    /// Alternate accessible names seen in the wild.
    pub synonyms: &'static [&'static str],
    pub kind: ControlKind,
}

impl FieldSpec {
    /// Label plus synonyms, lowercased, for accessible-name matching.
    pub fn name_candidates(&self) -> Vec<String> {
        let mut names = vec![self.label.to_lowercase()];
        for synonym in self.synonyms {
            let lower = synonym.to_lowercase();
            if !names.contains(&lower) {
                names.push(lower);
            }
        }
        names
    }

    /// Anchor texts tried in order by the text-anchor and keyboard
    /// strategies.
    pub fn anchor_texts(&self) -> Vec<&'static str> {
        let mut anchors = vec![self.label];
        anchors.extend(self.synonyms.iter().copied());
        anchors
    }
}

/// What goes into a located control.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(String),
    OptionChoice(String),
    File(PathBuf),
}

/// Values for one listing's form, assembled from the listing row and the
/// marketplace defaults.
#[derive(Debug, Clone)]
pub struct ListingForm {
    pub title: String,
    pub price: String,
    pub description: String,
    pub image: Option<PathBuf>,
    pub category: String,
    pub condition: String,
    pub availability: String,
}

impl ListingForm {
    pub fn value_for(&self, field: LogicalField) -> Option<FieldValue> {
        match field {
            LogicalField::Image => self.image.clone().map(FieldValue::File),
            LogicalField::Title => Some(FieldValue::Text(self.title.clone())),
            LogicalField::Price => Some(FieldValue::Text(self.price.clone())),
            LogicalField::Description => Some(FieldValue::Text(self.description.clone())),
            LogicalField::Category => Some(FieldValue::OptionChoice(self.category.clone())),
            LogicalField::Condition => Some(FieldValue::OptionChoice(self.condition.clone())),
            LogicalField::Availability => {
                Some(FieldValue::OptionChoice(self.availability.clone()))
            }
        }
    }
}

/// State threaded through one form's fill sequence so the structural
/// locator can anchor on previously filled values.
#[derive(Debug, Clone, Default)]
pub struct FillContext {
    pub previous_value: Option<String>,
    pub header_y_threshold: f64,
}
