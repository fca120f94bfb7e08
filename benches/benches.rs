use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use recordseal::{
    abe_policy::AccessPolicy, baseline::GlobalIndexStore, dsse::EncryptedIndex,
    KeyEncapsulationLayer, PatientIndexStore, Posting, RecordId, StorageGateway,
};

/// Generates access policies from 1 to 5 leaves, along with the attributes of
/// a user satisfying all of them.
///
/// Access policies with more than two leaves are generated only if
/// `--features full_bench` is passed.
fn get_access_policies() -> (Vec<&'static str>, Vec<AccessPolicy>) {
    #[allow(unused_mut)]
    let mut access_policies = vec!["DOCTOR", "DOCTOR and CARDIOLOGY"];

    #[cfg(feature = "full_bench")]
    {
        access_policies.push("DOCTOR and (CARDIOLOGY or ONCOLOGY)");
        access_policies.push("(DOCTOR and (CARDIOLOGY or ONCOLOGY)) or ADMIN");
        access_policies.push("(DOCTOR and (CARDIOLOGY or ONCOLOGY)) or (NURSE and WARD7)");
    }

    (
        vec!["DOCTOR", "CARDIOLOGY"],
        access_policies
            .into_iter()
            .map(|ap| AccessPolicy::parse(ap).expect("cannot parse access policy"))
            .collect(),
    )
}

fn bench_policy_encryption(c: &mut Criterion) {
    let kem = KeyEncapsulationLayer::default();
    let (pk, _) = kem.engine().setup();
    let (_, access_policies) = get_access_policies();
    let dk = kem.generate_data_key();

    let mut group = c.benchmark_group("Data key wrapping");
    for access_policy in &access_policies {
        group.bench_function(
            format!("{} leaf(s)", access_policy.leaf_count()),
            |b| {
                b.iter(|| {
                    kem.wrap(&pk, access_policy, &dk)
                        .expect("cannot wrap data key")
                });
            },
        );
    }
}

fn bench_policy_decryption(c: &mut Criterion) {
    let kem = KeyEncapsulationLayer::default();
    let (pk, msk) = kem.engine().setup();
    let (user_attributes, access_policies) = get_access_policies();
    let granted = kem
        .engine()
        .keygen(&msk, &user_attributes)
        .expect("cannot generate user key");
    let denied = kem
        .engine()
        .keygen(&msk, &["NURSE"])
        .expect("cannot generate user key");
    let dk = kem.generate_data_key();

    let mut group = c.benchmark_group("Data key unwrapping");
    for access_policy in &access_policies {
        let wrapped = kem
            .wrap(&pk, access_policy, &dk)
            .expect("cannot wrap data key");
        group.bench_function(
            format!("{} leaf(s), granted", access_policy.leaf_count()),
            |b| {
                b.iter(|| {
                    kem.unwrap(&granted, &wrapped)
                        .expect("cannot unwrap data key")
                });
            },
        );
        group.bench_function(
            format!("{} leaf(s), denied", access_policy.leaf_count()),
            |b| b.iter(|| kem.unwrap(&denied, &wrapped).is_err()),
        );
    }
}

/// Number of records in the store, one of which is searched.
fn record_counts() -> Vec<usize> {
    #[allow(unused_mut)]
    let mut counts = vec![10, 100, 1_000];
    #[cfg(feature = "full_bench")]
    counts.push(10_000);
    counts
}

/// Every record carries the searched keyword: the shared index has to filter
/// one occurrence per record whereas the per-record index does one lookup.
fn bench_search(c: &mut Criterion) {
    let kem = KeyEncapsulationLayer::default();
    let (pk, _) = kem.engine().setup();
    let (wrapped_key, ciphertext) = kem
        .encrypt_record(
            &pk,
            &AccessPolicy::parse("DOCTOR").expect("cannot parse access policy"),
            &RecordId::from("template"),
            b"record content",
        )
        .expect("cannot encrypt record");
    let posting = Posting::from("visit-1");

    let mut group = c.benchmark_group("Search one record");
    for n_records in record_counts() {
        let owner = PatientIndexStore::generate();
        let gateway = StorageGateway::new();
        let global = GlobalIndexStore::generate();
        for i in 0..n_records {
            let record_id = RecordId::new(format!("p{i}"));
            let update = owner
                .add_keywords(&record_id, &["diabetes", "hypertension"], &posting)
                .expect("cannot index record");
            gateway.store(
                record_id.clone(),
                ciphertext.clone(),
                wrapped_key.clone(),
                EncryptedIndex::from_update(&update).expect("cannot build index"),
            );
            global.add_keywords(&record_id, &["diabetes", "hypertension"], &posting);
        }

        let target = RecordId::new(format!("p{}", n_records / 2));
        let token = owner
            .generate_token(&target, "diabetes")
            .expect("cannot generate token");
        group.bench_with_input(
            BenchmarkId::new("per-record index", n_records),
            &n_records,
            |b, _| b.iter(|| gateway.search(&target, &token)),
        );

        let global_token = global.generate_token("diabetes");
        group.bench_with_input(
            BenchmarkId::new("shared index", n_records),
            &n_records,
            |b, _| b.iter(|| global.search_for_record(&global_token, &target)),
        );
    }
}

fn bench_index_update(c: &mut Criterion) {
    let owner = PatientIndexStore::generate();
    let record_id = RecordId::from("p1");
    let posting = Posting::from("visit");
    let keywords = ["diabetes", "hypertension", "asthma", "insulin", "metformin"];

    c.bench_function("Index update, 5 keywords", |b| {
        b.iter(|| {
            owner
                .add_keywords(&record_id, &keywords, &posting)
                .expect("cannot index record")
        });
    });
}

#[cfg(feature = "full_bench")]
fn bench_serialization(c: &mut Criterion) {
    use cosmian_crypto_core::bytes_ser_de::Serializable;

    let kem = KeyEncapsulationLayer::default();
    let (pk, msk) = kem.engine().setup();
    let (user_attributes, access_policies) = get_access_policies();
    let usk = kem
        .engine()
        .keygen(&msk, &user_attributes)
        .expect("cannot generate user key");
    let dk = kem.generate_data_key();

    println!("wrapped key size: ");
    for access_policy in &access_policies {
        let wrapped = kem
            .wrap(&pk, access_policy, &dk)
            .expect("cannot wrap data key");
        println!(
            "{} leaf(s): {} bytes",
            access_policy.leaf_count(),
            wrapped.serialize().unwrap().len(),
        );
    }
    println!(
        "usk with {} attributes: {} bytes",
        user_attributes.len(),
        usk.serialize().unwrap().len()
    );

    let mut group = c.benchmark_group("Key serialization");
    group.bench_function("PK", |b| {
        b.iter(|| pk.serialize().expect("cannot serialize pk"));
    });
    group.bench_function("USK", |b| {
        b.iter(|| usk.serialize().expect("cannot serialize usk"));
    });
}

criterion_group!(
    name = benches_abe;
    config = Criterion::default().sample_size(20);
    targets =
        bench_policy_encryption,
        bench_policy_decryption
);

criterion_group!(
    name = benches_index;
    config = Criterion::default().sample_size(1000);
    targets =
        bench_search,
        bench_index_update
);

#[cfg(feature = "full_bench")]
criterion_group!(
name = benches_serialization;
config = Criterion::default().sample_size(100);
targets = bench_serialization,
);

#[cfg(feature = "full_bench")]
criterion_main!(benches_abe, benches_index, benches_serialization);

#[cfg(not(feature = "full_bench"))]
criterion_main!(benches_abe, benches_index);
