//! XEP-0004: Data Forms
//!
//! Only what the registration exchange needs: building a `form` with
//! single-value fields and reading field values back from a `submit`.

use minidom::Element;

/// Namespace for XEP-0004 Data Forms
pub const NS_DATA_FORMS: &str = "jabber:x:data";

/// The `type` attribute of an `<x/>` form element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    Form,
    Submit,
    Cancel,
    Result,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Result => "result",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "form" => Some(Self::Form),
            "submit" => Some(Self::Submit),
            "cancel" => Some(Self::Cancel),
            "result" => Some(Self::Result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Hidden,
    TextSingle,
    TextPrivate,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::TextSingle => "text-single",
            Self::TextPrivate => "text-private",
        }
    }
}

/// A single-valued form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub var: String,
    pub field_type: Option<FieldType>,
    pub label: Option<String>,
    pub value: Option<String>,
}

impl FormField {
    pub fn new(var: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            var: var.into(),
            field_type: Some(field_type),
            label: None,
            value: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: Option<String>) -> Self {
        self.value = value;
        self
    }

    fn to_element(&self) -> Element {
        let mut field = Element::builder("field", NS_DATA_FORMS).attr("var", self.var.as_str());
        if let Some(field_type) = self.field_type {
            field = field.attr("type", field_type.as_str());
        }
        if let Some(label) = &self.label {
            field = field.attr("label", label.as_str());
        }
        if let Some(value) = &self.value {
            field = field.append(Element::builder("value", NS_DATA_FORMS).append(value.as_str()));
        }
        field.build()
    }
}

/// A data form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataForm {
    pub form_type: FormType,
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub fields: Vec<FormField>,
}

impl DataForm {
    pub fn new(form_type: FormType) -> Self {
        Self {
            form_type,
            title: None,
            instructions: None,
            fields: Vec::new(),
        }
    }

    /// Value of the first field named `var`, if it carries one.
    pub fn value(&self, var: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.var == var)
            .and_then(|field| field.value.as_deref())
    }

    pub fn to_element(&self) -> Element {
        let mut form = Element::builder("x", NS_DATA_FORMS).attr("type", self.form_type.as_str());
        if let Some(title) = &self.title {
            form = form.append(Element::builder("title", NS_DATA_FORMS).append(title.as_str()));
        }
        if let Some(instructions) = &self.instructions {
            form = form.append(
                Element::builder("instructions", NS_DATA_FORMS).append(instructions.as_str()),
            );
        }
        for field in &self.fields {
            form = form.append(field.to_element());
        }
        form.build()
    }

    /// Read a form from an `<x xmlns='jabber:x:data'/>` element.
    ///
    /// Unknown field types are kept with `field_type: None`; fields without
    /// a `var` are skipped. A missing `type` attribute reads as `submit`.
    pub fn from_element(element: &Element) -> Option<Self> {
        if !element.is("x", NS_DATA_FORMS) {
            return None;
        }

        let form_type = match element.attr("type") {
            Some(value) => FormType::parse(value)?,
            None => FormType::Submit,
        };

        let mut form = DataForm::new(form_type);
        for child in element.children() {
            if child.is("title", NS_DATA_FORMS) {
                form.title = Some(child.text());
            } else if child.is("instructions", NS_DATA_FORMS) {
                form.instructions = Some(child.text());
            } else if child.is("field", NS_DATA_FORMS) {
                let Some(var) = child.attr("var") else {
                    continue;
                };
                let field_type = match child.attr("type") {
                    Some("hidden") => Some(FieldType::Hidden),
                    Some("text-single") => Some(FieldType::TextSingle),
                    Some("text-private") => Some(FieldType::TextPrivate),
                    _ => None,
                };
                form.fields.push(FormField {
                    var: var.to_string(),
                    field_type,
                    label: child.attr("label").map(str::to_string),
                    value: child.get_child("value", NS_DATA_FORMS).map(|v| v.text()),
                });
            }
        }
        Some(form)
    }
}
