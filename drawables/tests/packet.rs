use drawables::*;

mod common;

fn record(pipeline: PipelineAcceleratorId) -> Drawable {
    Drawable::new(pipeline, draw_fn::draw)
}

/// Fills a packet with a fixed sequence of allocations and returns what was observed.
fn fill(packet: &mut DrawablesPacket) -> (Vec<u32>, Vec<Vec<u8>>, usize) {
    let mut offsets = vec![];
    offsets.push(packet.write_storage(StorageKind::Vertex, &[1.0f32, 2.0, 3.0]).offset);
    offsets.push(packet.write_storage(StorageKind::Vertex, &[4u8, 5]).offset);
    offsets.push(packet.write_storage(StorageKind::Index, &[0u16, 1, 2]).offset);
    offsets.push(packet.write_storage(StorageKind::Uniform, &[7u32; 5]).offset);
    offsets.push(packet.write_storage(StorageKind::Uniform, &[9u32; 2]).offset);
    offsets.push(packet.allocate_storage(StorageKind::FreeformCpu, 24).start_offset);

    let (_, geo) = packet.create_temporary_geo();
    geo.add_vertex_stream(StreamSource::Packet, 0);
    for _ in 0..3 {
        packet.push(record(PipelineAcceleratorId::default()));
    }

    let contents = [StorageKind::Vertex, StorageKind::Index, StorageKind::Uniform]
        .iter()
        .map(|k| packet.storage(*k).to_vec())
        .collect();
    (offsets, contents, packet.len())
}

#[test]
fn reset_is_idempotent() {
    common::init_tracing();
    let pool = DrawablesPacketPool::new(PacketPoolCreateInfo::default());
    let mut packet = pool.acquire();
    let first = fill(&mut packet);
    packet.reset();
    assert!(packet.is_empty());
    for kind in StorageKind::ALL {
        assert_eq!(packet.storage_len(kind), 0);
    }
    let second = fill(&mut packet);
    assert_eq!(first, second);

    // a recycled packet behaves like a fresh one
    drop(packet);
    let mut recycled = pool.acquire();
    assert!(recycled.is_empty());
    assert_eq!(fill(&mut recycled), first);
}

#[test]
fn storage_alignment() {
    let mut packet = DrawablesPacket::new(&PacketPoolCreateInfo {
        storage_alignment: [16, 4, 256, 8],
        ..Default::default()
    });
    let a = packet.allocate_storage(StorageKind::Uniform, 3).start_offset;
    let b = packet.allocate_storage(StorageKind::Uniform, 3).start_offset;
    assert_eq!((a, b), (0, 256));
    let a = packet.allocate_storage(StorageKind::Vertex, 12).start_offset;
    let b = packet.allocate_storage(StorageKind::Vertex, 12).start_offset;
    assert_eq!((a, b), (0, 16));
    packet.allocate_storage(StorageKind::Index, 2);
    assert_eq!(packet.allocate_storage(StorageKind::Index, 2).start_offset, 4);

    let a = packet.allocate_storage(StorageKind::FreeformCpu, 3);
    assert_eq!(a.start_offset, 0);
    assert_eq!(a.data.as_ptr() as usize % 8, 0);
    let b = packet.allocate_storage(StorageKind::FreeformCpu, 3);
    assert_eq!(b.start_offset, 8);
    assert_eq!(b.data.as_ptr() as usize % 8, 0);
}

#[test]
fn storage_contents() {
    let mut packet = DrawablesPacket::new(&PacketPoolCreateInfo::default());
    let range = packet.write_storage(StorageKind::Uniform, &[1.0f32, 0.0, 0.0, 1.0]);
    assert_eq!(range.size, 16);
    assert_eq!(packet.storage_range(range), bytemuck::cast_slice::<f32, u8>(&[1.0, 0.0, 0.0, 1.0]));
}

#[test]
#[should_panic]
fn storage_overflow() {
    let mut packet = DrawablesPacket::new(&PacketPoolCreateInfo {
        max_storage_size: 1024,
        ..Default::default()
    });
    packet.allocate_storage(StorageKind::Vertex, 2048);
}

#[test]
fn temporary_geometry() {
    let mut packet = DrawablesPacket::new(&PacketPoolCreateInfo::default());
    let (id, geo) = packet.create_temporary_geo();
    geo.add_vertex_stream(StreamSource::Packet, 32)
        .set_index_stream(StreamSource::Packet, Format::R16Uint, 0);
    packet.push(record(PipelineAcceleratorId::default()).with_geo(GeoRef::Local(id)));

    let geo = packet.geo(id);
    assert!(geo.flags.contains(GeoFlags::TEMPORARY));
    assert_eq!(geo.vertex_streams()[0].offset, 32);
    assert_eq!(geo.index_stream().map(|s| s.format), Some(Format::R16Uint));
}

#[test]
fn freeform_storage_is_stable() {
    let packet = DrawablesPacket::new(&PacketPoolCreateInfo {
        freeform_page_size: 128,
        ..Default::default()
    });
    let first = packet.allocate_freeform(16, 16);
    first.copy_from_slice(&[3u8; 16]);
    let others: Vec<&mut [u8]> = (0..64).map(|_| packet.allocate_freeform(100, 4)).collect();
    assert_eq!(others.len(), 64);
    assert_eq!(first, &[3u8; 16]);
    assert_eq!(first.as_ptr() as usize % 16, 0);
}
