use comfy_table::{
    Cell, CellAlignment, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};
use eyre_pretty::{Context, Result};
use vtxcore::layout::{ComponentType, NativeLayout};
use vtxcore::{CanonicalKey, VertexFormat};

pub fn layout_table(layout: &NativeLayout) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Attribute").set_alignment(CellAlignment::Center),
            Cell::new("Offset").set_alignment(CellAlignment::Center),
            Cell::new("Components").set_alignment(CellAlignment::Center),
            Cell::new("Type").set_alignment(CellAlignment::Center),
        ]);

    for (name, attr) in layout.attributes() {
        let ty = match attr.ty {
            ComponentType::F32 => "f32",
            ComponentType::U8 => "u8",
        };

        table.add_row(vec![
            Cell::new(name),
            Cell::new(attr.offset).set_alignment(CellAlignment::Right),
            Cell::new(attr.components).set_alignment(CellAlignment::Right),
            Cell::new(ty).set_alignment(CellAlignment::Center),
        ]);
    }

    table
}

pub fn describe(format: &VertexFormat) -> Result<()> {
    let shape = format.shape().context("validating vertex format")?;
    let layout = NativeLayout::new(&shape).context("laying out vertex format")?;
    let key = CanonicalKey::new(format);

    println!("{}", format.name());
    println!("key: {:08X?} (hash {:016X})", key.words(), key.hash());
    println!("input stride: {} bytes", shape.input_stride());
    println!("output stride: {} bytes", layout.stride);
    println!("{}", layout_table(&layout));

    Ok(())
}
