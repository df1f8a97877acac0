mod common;

use rowshape::{Shape, TargetType, Value, ValueType};

use common::{TestWorkspace, field, map_all, result_set, type_name};

const MEASURES: &str = r#"
root: Measure
types:
  - name: Measure
    abstract: true
    default: Small
    properties:
      - { name: Value, type: int32 }
    subtypes:
      - when: "value > 3"
        type: Big
  - name: Small
    extends: Measure
  - name: Big
    extends: Measure
"#;

const ORDERS: &str = r#"
root: list<Order>
settings:
  separator: "."
  unnamed_column_sentinel: "?column?"
columns:
  Id: int32
enums:
  - name: Status
    variants: [Open, Closed]
collections:
  - name: TagSet
    element: string
maps:
  - name: Attributes
    value: string
types:
  - name: Customer
    properties:
      - { name: Name, type: string }
  - name: Order
    constructors:
      - params: [{ name: id, type: int32 }]
    properties:
      - { name: Id, type: int32 }
      - { name: Status, type: Status }
      - { name: Customer, type: Customer }
      - { name: Tags, type: TagSet }
      - { name: Attrs, type: Attributes }
      - { name: Extra, type: "list<any>", sink: true }
"#;

#[test]
fn subtype_expressions_select_the_concrete_type() {
    let shape = Shape::from_yaml_str(MEASURES).unwrap();
    let set = result_set(
        &[("Value", ValueType::Int32)],
        (1..=5).map(|v| vec![Value::Int32(v)]).collect(),
    );
    let values = map_all(shape.root(), set, shape.options().clone());
    let names = values.iter().map(type_name).collect::<Vec<_>>();
    assert_eq!(names, ["Small", "Small", "Small", "Big", "Big"]);
    assert_eq!(field(&values[4], "Value"), &Value::Int32(5));
}

#[test]
fn shape_files_describe_nested_targets() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("orders.yaml", ORDERS);
    let shape = Shape::load(&path).unwrap();
    assert_eq!(shape.column_types().get("Id"), Some(&ValueType::Int32));
    assert!(matches!(shape.root(), TargetType::List(_)));

    let set = result_set(
        &[
            ("Id", ValueType::Int32),
            ("Status", ValueType::String),
            ("Customer.Name", ValueType::String),
            ("Tags", ValueType::String),
            ("Tags", ValueType::String),
            ("Attrs.Color", ValueType::String),
            ("?column?", ValueType::Int32),
        ],
        vec![vec![
            Value::Int32(7),
            Value::String("closed".into()),
            Value::String("Acme".into()),
            Value::String("urgent".into()),
            Value::String("gift".into()),
            Value::String("red".into()),
            Value::Int32(42),
        ]],
    );
    let values = map_all(shape.root(), set, shape.options().clone());
    let Value::List(orders) = &values[0] else {
        panic!("expected a list of orders, got {:?}", values[0]);
    };
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(field(order, "Id"), &Value::Int32(7));
    let Value::Enum(status) = field(order, "Status") else {
        panic!("status should be an enum");
    };
    assert_eq!(status.name.as_deref(), Some("Closed"));
    assert_eq!(field(field(order, "Customer"), "Name"), &Value::String("Acme".into()));
    assert_eq!(
        field(order, "Tags"),
        &Value::List(vec![Value::String("urgent".into()), Value::String("gift".into())])
    );
    let Value::Map(attrs) = field(order, "Attrs") else {
        panic!("attrs should be a map");
    };
    assert_eq!(attrs.get("Color"), Some(&Value::String("red".into())));
    assert_eq!(field(order, "Extra"), &Value::List(vec![Value::Int32(42)]));
}

#[test]
fn shapes_parse_type_expressions_against_declared_types() {
    let shape = Shape::from_yaml_str(ORDERS).unwrap();
    let parsed = shape.parse_type("map<tuple<Customer, int32?>>").unwrap();
    assert_eq!(parsed.type_name(), "map<tuple<Customer,int32?>>");
    assert!(shape.parse_type("list<Invoice>").is_err());
}

#[test]
fn malformed_shape_files_are_reported() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("bad.yaml", "root: int32\nunknown_key: true\n");
    let err = Shape::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("bad.yaml"));

    let bad_expr = "root: A\ntypes:\n  - name: A\n    abstract: true\n    subtypes:\n      - when: \"\"\n        type: A\n";
    assert!(Shape::from_yaml_str(bad_expr).is_err());
}

#[test]
fn shape_types_may_contain_themselves() {
    let yaml = "root: Node\ntypes:\n  - name: Node\n    properties:\n      - { name: Name, type: string }\n      - { name: Children, type: list<Node> }\n";
    let shape = Shape::from_yaml_str(yaml).unwrap();
    let set = result_set(
        &[("Name", ValueType::String), ("Children_Name", ValueType::String)],
        vec![vec![Value::String("root".into()), Value::String("leaf".into())]],
    );
    let values = map_all(shape.root(), set, shape.options().clone());
    let Value::List(children) = field(&values[0], "Children") else {
        panic!("expected a list of children, got {:?}", values[0]);
    };
    assert_eq!(children.len(), 1);
    assert_eq!(type_name(&children[0]), "Node");
    assert_eq!(field(&children[0], "Name"), &Value::String("leaf".into()));
}
