use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Fetched,
    states: [Fetched, Downloaded, Extracted, Chunked, Embedded, Persisted, Failed],
    events {
        download { transition: { from: Fetched, to: Downloaded } }
        extract { transition: { from: Downloaded, to: Extracted } }
        chunk { transition: { from: Extracted, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        persist { transition: { from: Embedded, to: Persisted } }
        abort {
            transition: { from: Fetched, to: Failed }
            transition: { from: Downloaded, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn fetched() -> IngestionMachine<(), Fetched> {
    IngestionMachine::new(())
}
