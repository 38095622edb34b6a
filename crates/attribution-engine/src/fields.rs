//! 规则字段类型、操作符与动作类型定义
//!
//! 三个封闭枚举及其 UI 元数据目录。目录仅供规则编辑界面使用，
//! 其约束（如每种字段类型可用的操作符菜单）必须与 evaluator 的语义保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// set_field 动作允许写入的文档字段白名单
pub const ALLOWED_SET_FIELDS: [&str; 3] = ["compte_comptable", "centre_cout", "projet"];

/// 条件字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Correspondent,
    DocumentType,
    Tag,
    Amount,
    Content,
    Date,
    CustomField,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correspondent => "correspondent",
            Self::DocumentType => "document_type",
            Self::Tag => "tag",
            Self::Amount => "amount",
            Self::Content => "content",
            Self::Date => "date",
            Self::CustomField => "custom_field",
        }
    }

    /// 从数据库存储的字符串解析，未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "correspondent" => Some(Self::Correspondent),
            "document_type" => Some(Self::DocumentType),
            "tag" => Some(Self::Tag),
            "amount" => Some(Self::Amount),
            "content" => Some(Self::Content),
            "date" => Some(Self::Date),
            "custom_field" => Some(Self::CustomField),
            _ => None,
        }
    }

    pub fn all() -> [Self; 7] {
        [
            Self::Correspondent,
            Self::DocumentType,
            Self::Tag,
            Self::Amount,
            Self::Content,
            Self::Date,
            Self::CustomField,
        ]
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 包含检查
    Contains,
    NotContains,

    // 字符串操作
    StartsWith,
    EndsWith,
    Regex,

    // 数值比较
    GreaterThan,
    LessThan,
    Between,

    // 列表成员
    In,
    NotIn,

    // 空值检查
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
        }
    }

    /// 从数据库存储的字符串解析，未知操作符返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equals" => Some(Self::Equals),
            "not_equals" => Some(Self::NotEquals),
            "contains" => Some(Self::Contains),
            "not_contains" => Some(Self::NotContains),
            "starts_with" => Some(Self::StartsWith),
            "ends_with" => Some(Self::EndsWith),
            "regex" => Some(Self::Regex),
            "greater_than" => Some(Self::GreaterThan),
            "less_than" => Some(Self::LessThan),
            "between" => Some(Self::Between),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "is_empty" => Some(Self::IsEmpty),
            "is_not_empty" => Some(Self::IsNotEmpty),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SetField,
    AddTag,
    RemoveTag,
    MoveToFolder,
    SetCorrespondent,
    SetDocumentType,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetField => "set_field",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::MoveToFolder => "move_to_folder",
            Self::SetCorrespondent => "set_correspondent",
            Self::SetDocumentType => "set_document_type",
        }
    }

    /// 从数据库存储的字符串解析，未知动作类型返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set_field" => Some(Self::SetField),
            "add_tag" => Some(Self::AddTag),
            "remove_tag" => Some(Self::RemoveTag),
            "move_to_folder" => Some(Self::MoveToFolder),
            "set_correspondent" => Some(Self::SetCorrespondent),
            "set_document_type" => Some(Self::SetDocumentType),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 字段类型目录条目（UI 元数据）
#[derive(Debug, Clone, Serialize)]
pub struct FieldTypeInfo {
    pub field_type: FieldType,
    pub label: &'static str,
    pub description: &'static str,
}

/// 动作类型目录条目（UI 元数据）
#[derive(Debug, Clone, Serialize)]
pub struct ActionTypeInfo {
    pub action_type: ActionType,
    pub label: &'static str,
    pub description: &'static str,
    pub requires_field_name: bool,
    /// set_field 可写入的字段（其余动作为空）
    pub fields: &'static [&'static str],
}

/// 操作符目录条目（UI 元数据）
#[derive(Debug, Clone, Serialize)]
pub struct OperatorInfo {
    pub operator: Operator,
    pub label: &'static str,
}

/// 条件可用的字段类型目录
///
/// 标签沿用产品的法语文案。
pub fn field_types() -> Vec<FieldTypeInfo> {
    vec![
        FieldTypeInfo {
            field_type: FieldType::Correspondent,
            label: "Correspondant",
            description: "Le correspondant/fournisseur du document",
        },
        FieldTypeInfo {
            field_type: FieldType::DocumentType,
            label: "Type de document",
            description: "Le type de document (facture, contrat, etc.)",
        },
        FieldTypeInfo {
            field_type: FieldType::Tag,
            label: "Tag",
            description: "Les tags assignés au document",
        },
        FieldTypeInfo {
            field_type: FieldType::Amount,
            label: "Montant",
            description: "Le montant du document",
        },
        FieldTypeInfo {
            field_type: FieldType::Content,
            label: "Contenu (OCR)",
            description: "Le texte extrait du document",
        },
        FieldTypeInfo {
            field_type: FieldType::Date,
            label: "Date du document",
            description: "La date du document",
        },
        FieldTypeInfo {
            field_type: FieldType::CustomField,
            label: "Champ personnalisé",
            description: "Un champ personnalisé défini",
        },
    ]
}

/// 可用的动作类型目录
pub fn action_types() -> Vec<ActionTypeInfo> {
    vec![
        ActionTypeInfo {
            action_type: ActionType::SetField,
            label: "Définir un champ",
            description: "Définit la valeur d'un champ (compte comptable, centre de coût, etc.)",
            requires_field_name: true,
            fields: &ALLOWED_SET_FIELDS,
        },
        ActionTypeInfo {
            action_type: ActionType::AddTag,
            label: "Ajouter un tag",
            description: "Ajoute un tag au document",
            requires_field_name: false,
            fields: &[],
        },
        ActionTypeInfo {
            action_type: ActionType::RemoveTag,
            label: "Retirer un tag",
            description: "Retire un tag du document",
            requires_field_name: false,
            fields: &[],
        },
        ActionTypeInfo {
            action_type: ActionType::MoveToFolder,
            label: "Déplacer vers dossier",
            description: "Déplace le document vers un dossier logique",
            requires_field_name: false,
            fields: &[],
        },
        ActionTypeInfo {
            action_type: ActionType::SetCorrespondent,
            label: "Définir correspondant",
            description: "Définit le correspondant du document",
            requires_field_name: false,
            fields: &[],
        },
        ActionTypeInfo {
            action_type: ActionType::SetDocumentType,
            label: "Définir type de document",
            description: "Définit le type de document",
            requires_field_name: false,
            fields: &[],
        },
    ]
}

/// 某字段类型可用的操作符菜单
///
/// 菜单必须与 evaluator 语义一致：tag 只暴露成员类操作符，
/// amount 暴露数值操作符，content 只暴露文本操作符。
pub fn operators_for_field_type(field_type: FieldType) -> Vec<OperatorInfo> {
    let common = [
        (Operator::Equals, "Égal à"),
        (Operator::NotEquals, "Différent de"),
        (Operator::IsEmpty, "Est vide"),
        (Operator::IsNotEmpty, "N'est pas vide"),
    ];
    let text = [
        (Operator::Contains, "Contient"),
        (Operator::NotContains, "Ne contient pas"),
        (Operator::StartsWith, "Commence par"),
        (Operator::EndsWith, "Termine par"),
        (Operator::Regex, "Expression régulière"),
    ];
    let numeric = [
        (Operator::GreaterThan, "Supérieur à"),
        (Operator::LessThan, "Inférieur à"),
        (Operator::Between, "Entre"),
    ];
    let list = [
        (Operator::In, "Dans la liste"),
        (Operator::NotIn, "Pas dans la liste"),
    ];

    let build = |sets: &[&[(Operator, &'static str)]]| -> Vec<OperatorInfo> {
        sets.iter()
            .flat_map(|s| s.iter())
            .map(|&(operator, label)| OperatorInfo { operator, label })
            .collect()
    };

    match field_type {
        FieldType::Correspondent | FieldType::DocumentType => build(&[&common, &list]),
        FieldType::Tag => vec![
            OperatorInfo {
                operator: Operator::Contains,
                label: "A le tag",
            },
            OperatorInfo {
                operator: Operator::NotContains,
                label: "N'a pas le tag",
            },
            OperatorInfo {
                operator: Operator::In,
                label: "A un des tags",
            },
            OperatorInfo {
                operator: Operator::NotIn,
                label: "N'a aucun des tags",
            },
            OperatorInfo {
                operator: Operator::IsEmpty,
                label: "Aucun tag",
            },
            OperatorInfo {
                operator: Operator::IsNotEmpty,
                label: "A au moins un tag",
            },
        ],
        FieldType::Amount => build(&[&common, &numeric]),
        FieldType::Content => build(&[&text]),
        FieldType::Date => build(&[
            &common,
            &[(Operator::Between, "Entre")],
        ]),
        FieldType::CustomField => build(&[&common, &text, &numeric, &list]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_round_trip() {
        for op in [
            Operator::Equals,
            Operator::NotEquals,
            Operator::Contains,
            Operator::NotContains,
            Operator::StartsWith,
            Operator::EndsWith,
            Operator::Regex,
            Operator::GreaterThan,
            Operator::LessThan,
            Operator::Between,
            Operator::In,
            Operator::NotIn,
            Operator::IsEmpty,
            Operator::IsNotEmpty,
        ] {
            assert_eq!(Operator::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operator::parse("matches_fuzzy"), None);
    }

    #[test]
    fn test_tag_operators_are_membership_only() {
        let ops: Vec<Operator> = operators_for_field_type(FieldType::Tag)
            .iter()
            .map(|i| i.operator)
            .collect();
        assert!(ops.contains(&Operator::Contains));
        assert!(ops.contains(&Operator::In));
        assert!(!ops.contains(&Operator::GreaterThan));
        assert!(!ops.contains(&Operator::Regex));
    }

    #[test]
    fn test_amount_operators_include_numeric() {
        let ops: Vec<Operator> = operators_for_field_type(FieldType::Amount)
            .iter()
            .map(|i| i.operator)
            .collect();
        assert!(ops.contains(&Operator::Between));
        assert!(ops.contains(&Operator::GreaterThan));
        assert!(!ops.contains(&Operator::Contains));
    }

    #[test]
    fn test_set_field_allow_list() {
        let catalog = action_types();
        let set_field = catalog
            .iter()
            .find(|a| a.action_type == ActionType::SetField)
            .unwrap();
        assert!(set_field.requires_field_name);
        assert_eq!(set_field.fields, &["compte_comptable", "centre_cout", "projet"]);
    }

    #[test]
    fn test_field_type_catalog_is_closed() {
        assert_eq!(field_types().len(), FieldType::all().len());
    }
}
