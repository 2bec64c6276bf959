//! Host structs shared by the unit tests.

use crate::descriptor::{HostStruct, StructBuilder};
use crate::reflect_struct;
use crate::value::Shared;
use std::collections::HashMap;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct MyStruct {
    pub bool: bool,
    pub int: i64,
    pub int8: i8,
    pub int16: i16,
    pub int32: i32,
    pub int64: i64,
    pub uint: u64,
    pub uint8: u8,
    pub uint16: u16,
    pub uint32: u32,
    pub uint64: u64,
    pub string: String,
    pub bytes: Vec<u8>,
    pub float32: f32,
    pub float64: f64,
    pub date: SystemTime,
    pub empty: Option<Shared<MyStruct>>,
    pub nested: Option<Shared<MyStruct>>,
    pub slice: Vec<i64>,
    pub struct_slice: Vec<MyNestedStruct>,
    pub struct_map: HashMap<String, MyNestedStruct>,
    pub private: bool,
}

impl Default for MyStruct {
    fn default() -> Self {
        Self {
            bool: false,
            int: 0,
            int8: 0,
            int16: 0,
            int32: 0,
            int64: 0,
            uint: 0,
            uint8: 0,
            uint16: 0,
            uint32: 0,
            uint64: 0,
            string: String::new(),
            bytes: Vec::new(),
            float32: 0.0,
            float64: 0.0,
            date: SystemTime::UNIX_EPOCH,
            empty: None,
            nested: None,
            slice: Vec::new(),
            struct_slice: Vec::new(),
            struct_map: HashMap::new(),
            private: false,
        }
    }
}

impl HostStruct for MyStruct {
    const NAME: &'static str = "MyStruct";

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
        builder
            .field("Bool", |s| s.bool, |s, v| s.bool = v)
            .tag("bool")
            .field("Int", |s| s.int, |s, v| s.int = v)
            .tag("int")
            .field("Int8", |s| s.int8, |s, v| s.int8 = v)
            .tag("int8")
            .field("Int16", |s| s.int16, |s, v| s.int16 = v)
            .tag("int16")
            .field("Int32", |s| s.int32, |s, v| s.int32 = v)
            .tag("int32")
            .field("Int64", |s| s.int64, |s, v| s.int64 = v)
            .tag("int64")
            .field("Uint", |s| s.uint, |s, v| s.uint = v)
            .tag("uint")
            .field("Uint8", |s| s.uint8, |s, v| s.uint8 = v)
            .tag("uint8")
            .field("Uint16", |s| s.uint16, |s, v| s.uint16 = v)
            .tag("uint16")
            .field("Uint32", |s| s.uint32, |s, v| s.uint32 = v)
            .tag("uint32")
            .field("Uint64", |s| s.uint64, |s, v| s.uint64 = v)
            .tag("uint64")
            .field("String", |s| s.string.clone(), |s, v| s.string = v)
            .tag("string")
            .field("Bytes", |s| s.bytes.clone(), |s, v| s.bytes = v)
            .tag("bytes")
            .field("Float32", |s| s.float32, |s, v| s.float32 = v)
            .tag("float32")
            .field("Float64", |s| s.float64, |s, v| s.float64 = v)
            .tag("float64")
            .field("Date", |s| s.date, |s, v| s.date = v)
            .tag("date")
            .field("Empty", |s| s.empty.clone(), |s, v| s.empty = v)
            .tag("empty")
            .field("Nested", |s| s.nested.clone(), |s, v| s.nested = v)
            .tag("nested")
            .field("Slice", |s| s.slice.clone(), |s, v| s.slice = v)
            .tag("slice")
            .field("StructSlice", |s| s.struct_slice.clone(), |s, v| s.struct_slice = v)
            .tag("structSlice")
            .field("StructMap", |s| s.struct_map.clone(), |s, v| s.struct_map = v)
            .tag("structMap")
            .field("private", |s| s.private, |s, v| s.private = v)
            .value_method("Describe", |this| move || format!("{}:{}", this.string, this.int))
            .method("Multiply", |this| move |x: i64| this.borrow().int * x)
    }
}

/// The instance most tests start from.
pub fn my_struct() -> MyStruct {
    MyStruct {
        int: 42,
        string: "foo".into(),
        ..MyStruct::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MyNestedStruct {
    pub x: i64,
}

impl HostStruct for MyNestedStruct {
    const NAME: &'static str = "MyNestedStruct";

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
        builder.field("X", |s| s.x, |s, v| s.x = v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tagged {
    pub field_a: String,
    pub field_b: String,
}

impl HostStruct for Tagged {
    const NAME: &'static str = "Tagged";

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
        builder
            .field("FieldA", |s| s.field_a.clone(), |s, v| s.field_a = v)
            .tag("fielda")
            .field("FieldB", |s| s.field_b.clone(), |s, v| s.field_b = v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoTags {
    pub field_a: String,
    pub field_b: String,
}

impl HostStruct for NoTags {
    const NAME: &'static str = "NoTags";

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
        builder
            .field("FieldA", |s| s.field_a.clone(), |s, v| s.field_a = v)
            .field("FIELDB", |s| s.field_b.clone(), |s, v| s.field_b = v)
    }
}

reflect_struct!(MyStruct, MyNestedStruct, Tagged, NoTags);
